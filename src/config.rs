// Lox calls past this depth fail with a stack overflow runtime error. The
// evaluator grows its own stack as it recurses (see `stack`), so the limit
// does not depend on the host thread's stack size.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 200;

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub max_call_depth: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            // set default values here, unless overridden via command-line
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
        }
    }
}
