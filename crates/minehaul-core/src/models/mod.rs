//! Data models for minehaul entities.
//!
//! This module contains the data structures exchanged with the backend:
//!
//! - `Identity`, `Role`, `AccountKind`: the signed-in planner
//! - `SessionRecord`: one login instance tracked by the server
//! - `Order`, `Schedule`: logistics records relayed from the API
//! - `OrderForm`, `ScheduleForm`, `ScheduleUpdate`: request bodies for creating and updating them

pub mod order;
pub mod schedule;
pub mod session;
pub mod user;

pub use order::{Order, OrderForm, OrderStatus};
pub use schedule::{Schedule, ScheduleForm, ScheduleStatus, ScheduleUpdate};
pub use session::SessionRecord;
pub use user::{AccountKind, Identity, LoginCredentials, Registration, Role};
