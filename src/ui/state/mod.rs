pub mod filter_controls;
