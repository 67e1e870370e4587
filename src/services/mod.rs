pub mod rental_service;
pub mod workflow;

pub use rental_service::RentalService;
