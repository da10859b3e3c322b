//! Data models for the game service

pub mod bag_request;
pub mod invitation;
pub mod session;
pub mod token;
pub mod upload;

pub use bag_request::BagRequest;
pub use invitation::{Invitation, InvitationError, clamp_ttl_hours};
pub use session::AuthorizedSession;
pub use token::UploadToken;
pub use upload::{NewUploadLog, UploadLog};
