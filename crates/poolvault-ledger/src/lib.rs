//! # poolvault-ledger
//!
//! **Accounting core**: the bookkeeping primitives every vault operation
//! runs through.
//!
//! ## Components
//!
//! 1. **SessionLedger**: per-transaction handler stack and signed deltas per
//!    (handler, token), with an O(1) "fully settled" predicate
//! 2. **TokenLedger**: balances, allowances and total supply for every pool
//!    share token, with a minimum-supply floor
//! 3. **ReserveTracker**: declared reserves per token, reconciled against
//!    real balances on settle / send
//! 4. **ReentrancyLock**: scoped guard for non-reentrant operations
//! 5. **PauseWindow**: decaying pausability window fixed at deployment
//!
//! ## Session Flow
//!
//! ```text
//! open(handler) → take_debt / supply_credit … → close()  (fails unless every delta is zero)
//! ```

pub mod multi_token;
pub mod pause_window;
pub mod reentrancy;
pub mod reserves;
pub mod session;

pub use multi_token::TokenLedger;
pub use pause_window::PauseWindow;
pub use reentrancy::{ReentrancyGuard, ReentrancyLock};
pub use reserves::ReserveTracker;
pub use session::{ExecutionMode, SessionLedger};
