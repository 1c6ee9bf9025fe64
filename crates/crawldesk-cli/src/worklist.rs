use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use crawldesk_core::NewTask;
use crawldesk_core::models::TaskItem;
use crawldesk_core::sites::Site;
use serde::Deserialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// A TOML file listing the tasks to run, `[[tasks]]` per entry.
#[derive(Debug, Deserialize)]
pub struct Worklist {
    #[serde(default)]
    pub tasks: Vec<WorklistTask>,
}

#[derive(Debug, Deserialize)]
pub struct WorklistTask {
    pub site: Site,
    pub id: String,
    pub output_name: Option<String>,
    pub base_dir: Option<PathBuf>,
    /// RFC 3339; tasks without one run immediately.
    pub scheduled_time: Option<String>,
    #[serde(default)]
    pub debug: bool,
    pub items: Option<Vec<toml::Value>>,
}

impl Worklist {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read worklist '{}'", path.display()))?;
        let worklist: Worklist = toml::from_str(&text)
            .with_context(|| format!("invalid worklist '{}'", path.display()))?;

        let mut seen = std::collections::BTreeSet::new();
        for task in &worklist.tasks {
            anyhow::ensure!(
                seen.insert((task.site, task.id.as_str())),
                "duplicate task id '{}' for site {}",
                task.id,
                task.site
            );
        }
        Ok(worklist)
    }

    pub fn sites(&self) -> Vec<Site> {
        let mut sites: Vec<Site> = self.tasks.iter().map(|task| task.site).collect();
        sites.sort();
        sites.dedup();
        sites
    }

    pub fn for_site(&self, site: Site) -> impl Iterator<Item = &WorklistTask> {
        self.tasks.iter().filter(move |task| task.site == site)
    }
}

impl WorklistTask {
    pub fn scheduled_at(&self) -> Result<Option<SystemTime>> {
        self.scheduled_time
            .as_deref()
            .map(|text| {
                OffsetDateTime::parse(text, &Rfc3339)
                    .map(SystemTime::from)
                    .with_context(|| format!("task '{}': invalid scheduled_time '{text}'", self.id))
            })
            .transpose()
    }

    /// Builds the engine payload, decoding items into the site's item type.
    pub fn to_new_task<I: TaskItem>(&self) -> Result<NewTask<I>> {
        let items = self
            .items
            .as_ref()
            .map(|values| {
                values
                    .iter()
                    .cloned()
                    .map(|value| value.try_into::<I>())
                    .collect::<Result<Vec<I>, _>>()
            })
            .transpose()
            .with_context(|| format!("task '{}': items do not match site {}", self.id, self.site))?;

        Ok(NewTask {
            id: self.id.as_str().into(),
            items,
            output_name: self.output_name.clone(),
            output_base_dir: self.base_dir.clone(),
            scheduled_time: self.scheduled_at()?,
            debug: self.debug,
        })
    }
}
