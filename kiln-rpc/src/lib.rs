//! # Kiln RPC Utilities
//!
//! Purpose: Provide the shared retry loop used by RPC call sites across the
//! build-acceleration service, with an explicit transience seam so the
//! driver stays agnostic of any one backend protocol.
//!
//! ## Design Principles
//! 1. **Single Retry Loop**: One driver shared by every backend call site.
//! 2. **Closed Classification**: Errors report transience through a trait,
//!    never through runtime type probing.
//! 3. **Bounded Waiting**: Backoff is capped and monotonically non-decreasing.
//! 4. **Caller-Owned Deadlines**: Cancellation arrives by dropping the
//!    future; every await point inside the loop is a cancellation point.

mod retry;

pub use retry::{Backoff, Retry, Transient};
