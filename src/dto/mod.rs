pub mod health;
pub mod interaction;
pub mod validation;
pub mod ws;
