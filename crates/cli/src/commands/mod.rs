pub mod doctor;
pub mod gateway;
pub mod onboard;
pub mod personas;
pub mod user;
