pub mod image_loader;

pub use image_loader::{is_allowed_image, load_all_images, ALLOWED_EXTENSIONS};
