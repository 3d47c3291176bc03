pub mod bunch;
pub mod check;
pub mod element;
pub mod line;
