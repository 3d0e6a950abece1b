use smallstr::SmallString;

/// Inline-allocated state key; most real-world keys are empty strings or
/// short user ids.
pub type StateKey = SmallString<[u8; INLINE_SIZE]>;

const INLINE_SIZE: usize = 48;
