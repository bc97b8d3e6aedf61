#![doc = include_str!(concat!("../", env!("CARGO_PKG_README")))]

#[doc(inline)]
pub use oblique_image as image;

#[doc(inline)]
pub use oblique_imgproc as imgproc;

#[doc(inline)]
pub use oblique_3d as o3d;

#[doc(inline)]
pub use oblique_velocity as velocity;
