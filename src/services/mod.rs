pub mod coordinate_validator;
