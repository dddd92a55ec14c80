pub mod cache;
pub mod entitlement;
pub mod error;
pub mod pairing;
pub mod remote;
pub mod sync;
pub mod timeline;
