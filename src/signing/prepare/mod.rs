pub mod destinations;
pub mod input_selector;
