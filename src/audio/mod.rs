pub mod backend;
pub mod capture;
pub mod playback;

pub use backend::{AudioFrame, CaptureBackend, FileBackend};
pub use capture::{
    downsample, frame_level, AudioCapture, CaptureError, GrantedPermissions, MicrophonePermission,
    PermissionProvider, WAVEFORM_POINTS,
};
pub use playback::AudioPlayback;
