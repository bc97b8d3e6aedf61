mod intrinsics;
pub use intrinsics::IntrinsicModel;

mod model;
pub use model::{CameraModel, InverseProjectionGrid, Projection, ProjectionDistortion};

mod pose;
pub use pose::{rotation_from_ypr, CameraPose};
