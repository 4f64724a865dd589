// Publish service
// Turns a session's file map into a read-only published site. The slug
// is minted once per session and survives republishing; the viewer
// serves pages with the navigation script injected so in-site links
// keep working.

use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{PublishedSite, Session};
use crate::repositories::SiteRepository;
use crate::services::navigation::ViewerNavigator;
use crate::services::preview::inject_bridge_script;
use crate::services::workspace::choose_main_file;
use crate::utils::Database;

const SLUG_LEN: usize = 8;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Session has no generated files to publish")]
    NothingToPublish,

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<String> for PublishError {
    fn from(message: String) -> Self {
        PublishError::Storage(message)
    }
}

pub struct PublishService {
    sites: SiteRepository,
}

impl PublishService {
    pub fn new(db: Database) -> Self {
        Self {
            sites: SiteRepository::new(db),
        }
    }

    /// Publish (or republish) a session. The first publish mints the
    /// slug and uid; later ones keep both and bump `updated_at`.
    pub fn publish(&self, session: &Session) -> Result<PublishedSite, PublishError> {
        if session.generated_files.is_empty() {
            return Err(PublishError::NothingToPublish);
        }

        let now = Utc::now();
        let existing = self.sites.get_by_session(&session.id)?;
        let (slug, uid, published_at) = match &existing {
            Some(site) => (site.slug.clone(), site.uid.clone(), site.published_at),
            None => (self.mint_slug()?, Uuid::new_v4().to_string(), now),
        };

        let main_file = choose_main_file(&session.generated_files)
            .ok_or(PublishError::NothingToPublish)?;

        let site = PublishedSite {
            slug,
            uid,
            session_id: session.id.clone(),
            title: session.title.clone(),
            files: session.generated_files.keys().cloned().collect(),
            file_contents: session.generated_files.clone(),
            main_file,
            published_at,
            updated_at: now,
        };
        self.sites.upsert(&site)?;
        log::info!(
            "[publish] session {} published at /view/{}",
            session.id,
            site.slug
        );
        Ok(site)
    }

    pub fn site_by_slug(&self, slug: &str) -> Result<Option<PublishedSite>, PublishError> {
        Ok(self.sites.get_by_slug(slug)?)
    }

    /// Render one page of a published site. Unknown file names fall
    /// back to the main file; only an unknown slug is an error, and
    /// that is the caller's 404.
    pub fn render_page(&self, site: &PublishedSite, file_name: Option<&str>) -> String {
        let navigator = ViewerNavigator::new(site);
        let resolved = file_name
            .and_then(|name| navigator.resolve(name))
            .unwrap_or_else(|| site.main_file.clone());
        let html = site
            .file_contents
            .get(&resolved)
            .or_else(|| site.file_contents.get(&site.main_file))
            .cloned()
            .unwrap_or_default();
        inject_bridge_script(&html)
    }

    fn mint_slug(&self) -> Result<String, PublishError> {
        loop {
            let slug: String = rand::thread_rng()
                .sample_iter(&Alphanumeric)
                .take(SLUG_LEN)
                .map(|b| (b as char).to_ascii_lowercase())
                .collect();
            if !self.sites.slug_exists(&slug)? {
                return Ok(slug);
            }
        }
    }
}
