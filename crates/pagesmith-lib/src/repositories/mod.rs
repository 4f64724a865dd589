// Repository modules

pub mod session_repo;
pub mod site_repo;
pub mod usage_repo;
pub mod version_repo;

pub use session_repo::SessionRepository;
pub use site_repo::SiteRepository;
pub use usage_repo::UsageRepository;
pub use version_repo::{VersionRepository, VERSIONS_PER_FILE};
