pub mod relativity;
