//! CDI resources: DataVolumes, storage configuration, uploads and the
//! hostpath provisioner

pub mod datavolume;
pub mod hpp;
pub mod storage;
pub mod upload;

pub use datavolume::{ContentType, DataVolume, DataVolumeBuilder, DataVolumeManager, DvPhase};
pub use hpp::HppManager;
pub use storage::StorageManager;
pub use upload::UploadManager;
