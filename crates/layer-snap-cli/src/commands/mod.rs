pub mod align;
pub mod tolerance;
