pub mod forward;
pub mod health;
pub mod passthrough;
pub mod responses;
