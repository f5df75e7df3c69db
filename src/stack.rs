//! Stack growth for the recursive parts of the pipeline.
//!
//! The parser and the evaluator both recurse once per level of source
//! nesting, and the evaluator recurses several frames per Lox call. Wrapping
//! those entry points in [`ensure_sufficient_stack`] moves execution onto a
//! freshly allocated segment whenever the current one runs low, so the
//! configured limits (call depth, nesting) are what stop a deep program
//! rather than the host thread's stack size.

/// Grow when less than this much stack remains.
const RED_ZONE: usize = 128 * 1024;

/// Size of each newly allocated stack segment.
const STACK_PER_RECURSION: usize = 1024 * 1024;

#[inline]
#[cfg(not(target_arch = "wasm32"))]
pub fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    stacker::maybe_grow(RED_ZONE, STACK_PER_RECURSION, f)
}

#[inline]
#[cfg(target_arch = "wasm32")]
pub fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    f()
}
