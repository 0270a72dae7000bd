pub mod html;
pub mod surface;
pub mod tree;
