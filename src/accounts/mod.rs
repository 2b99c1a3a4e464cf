mod memory;
mod model;
mod repo;

pub use memory::MemoryAccountStore;
pub use model::{
    normalize_email, Account, ApprovalState, ApprovalStatus, PendingLogin, PendingStatus, Role,
};
pub use repo::{AccountStore, DuplicateEmail, PgAccountStore};
