pub mod edit_service;
pub mod export_service;
pub mod fetch_scheduler;
pub mod grid_controller;
pub mod import_service;
pub mod person_picker;
