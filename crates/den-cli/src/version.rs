pub const FULL: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    "+git.",
    env!("DEN_GIT_COUNT"),
    ".",
    env!("DEN_GIT_SHA"),
    env!("DEN_GIT_DIRTY")
);
