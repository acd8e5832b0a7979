pub mod binding;
pub mod claim_token;
pub mod device;
pub mod session;

pub use binding::UserDeviceBinding;
pub use claim_token::ClaimToken;
pub use device::{DeviceRegistration, DeviceStatus};
pub use session::DeviceSession;
