// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Tracing runtime control.

use ordermap::OrderMap;
use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, Registry, filter::LevelFilter, prelude::*, reload};

use crate::display::TargetDbByTag;
use crate::targets::DECLARED_TARGETS;
use crate::trace_target;

trace_target!("tracectl", LevelFilter::INFO, &[]);

/// Errors produced while applying a tracing configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TraceCtlError {
    /// An item of the configuration string is not of the form `tag=level`.
    #[error("invalid syntax '{0}': expected tag=level")]
    Syntax(String),
    /// The level of a configuration item is not one of off,error,warn,info,debug,trace.
    #[error("invalid level '{0}' for tag '{1}'")]
    Level(String, String),
}

/// The configuration of a single tracing target.
#[derive(Debug, Clone)]
pub struct TargetCfg {
    pub target: &'static str,
    pub name: &'static str,
    pub level: LevelFilter,
    pub tags: Vec<&'static str>,
}

impl TargetCfg {
    fn new(
        target: &'static str,
        name: &'static str,
        level: LevelFilter,
        tags: &'static [&'static str],
    ) -> Self {
        // a target always answers to its own name
        let mut tags = tags.to_vec();
        if !tags.contains(&name) {
            tags.push(name);
        }
        Self {
            target,
            name,
            level,
            tags,
        }
    }
}

#[derive(Debug)]
pub(crate) struct TargetDb {
    pub(crate) level: LevelFilter,
    pub(crate) targets: OrderMap<&'static str, TargetCfg>,
    pub(crate) tags: OrderMap<&'static str, BTreeSet<&'static str>>,
}

impl TargetDb {
    fn from_link_time_targets(level: LevelFilter) -> Self {
        let mut db = Self {
            level,
            targets: OrderMap::new(),
            tags: OrderMap::new(),
        };
        for t in DECLARED_TARGETS {
            db.register(TargetCfg::new(t.target, t.name, t.level, t.tags));
        }
        db
    }

    fn register(&mut self, cfg: TargetCfg) {
        for tag in &cfg.tags {
            self.tags.entry(*tag).or_default().insert(cfg.target);
        }
        if let Some(exist) = self.targets.insert(cfg.target, cfg) {
            warn!("Target {} has been multiply defined!", exist.target);
        }
    }

    fn env_filter(&self) -> EnvFilter {
        self.targets.values().fold(
            EnvFilter::new(self.level.to_string()),
            |filter, target| match format!("{}={}", target.target, target.level).parse() {
                Ok(directive) => filter.add_directive(directive),
                Err(e) => {
                    warn!("Skipping filter for target {}: {e}", target.target);
                    filter
                }
            },
        )
    }

    /// Apply `level` to every target carrying `tag`.  Returns how many targets changed.
    fn set_tag_level(&mut self, tag: &str, level: LevelFilter) -> usize {
        let Some(members) = self.tags.get(tag) else {
            return 0;
        };
        let mut changed = 0;
        for target in self
            .targets
            .values_mut()
            .filter(|t| members.contains(t.target))
        {
            if target.level != level {
                target.level = level;
                changed += 1;
            }
        }
        changed
    }

    fn as_config_string(&self) -> String {
        self.targets
            .values()
            .fold(format!("default={}", self.level), |acc, t| {
                format!("{acc},{}={}", t.name, t.level)
            })
    }
}

/// Runtime handle on the process-wide tracing subscriber.
#[derive(Debug)]
pub struct TracingControl {
    db: Mutex<TargetDb>,
    reload_filter: reload::Handle<EnvFilter, Registry>,
}

static TRACING_CTL: OnceLock<TracingControl> = OnceLock::new();

/// Get a reference to the process-wide [`TracingControl`], initializing it if needed.
pub fn get_trace_ctl() -> &'static TracingControl {
    TRACING_CTL.get_or_init(TracingControl::new)
}

impl TracingControl {
    fn new() -> Self {
        let db = TargetDb::from_link_time_targets(LevelFilter::INFO);
        let (filter, reload_filter) = reload::Layer::new(db.env_filter());
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_line_number(true)
            .with_target(true)
            .with_thread_names(true)
            .with_level(true);
        if let Err(e) = tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init()
        {
            // somebody (most likely a test harness) got there first; keep the db usable anyway
            eprintln!("tracing subscriber already installed: {e}");
        }
        Self {
            db: Mutex::new(db),
            reload_filter,
        }
    }

    fn db(&self) -> MutexGuard<'_, TargetDb> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reload(&self, db: &TargetDb) {
        if let Err(e) = self.reload_filter.reload(db.env_filter()) {
            warn!("Failed to reload tracing filter: {e}");
        }
    }

    /// Make sure the subscriber is installed.
    pub fn init() {
        get_trace_ctl();
    }

    pub fn set_tag_level(&self, tag: &str, level: LevelFilter) {
        let mut db = self.db();
        let changed = db.set_tag_level(tag, level);
        if changed > 0 {
            self.reload(&db);
        }
        info!("Changed log level for tag '{tag}' to {level}. Targets changed: {changed}");
    }

    pub fn set_level_all(&self, level: LevelFilter) {
        let mut db = self.db();
        db.targets.values_mut().for_each(|t| t.level = level);
        self.reload(&db);
    }

    pub fn set_default_level(&self, level: LevelFilter) {
        let mut db = self.db();
        if db.level != level {
            db.level = level;
            self.reload(&db);
            info!("Set default log level to {level}");
        }
    }

    #[must_use]
    pub fn get_default_level(&self) -> LevelFilter {
        self.db().level
    }

    /// Parse a string made of comma-separated tag=level items.
    fn parse_tracing_config(input: &str) -> Result<OrderMap<String, LevelFilter>, TraceCtlError> {
        input
            .split(',')
            .map(str::trim)
            .map(|item| {
                let (tag, level) = item
                    .split_once('=')
                    .ok_or_else(|| TraceCtlError::Syntax(item.to_string()))?;
                let (tag, level) = (tag.trim(), level.trim());
                LevelFilter::from_str(level)
                    .map(|level| (tag.to_string(), level))
                    .map_err(|_| TraceCtlError::Level(level.to_string(), tag.to_string()))
            })
            .collect()
    }

    /// Apply a configuration such as `default=warn,all=info,vxlan=debug`.
    ///
    /// `default` sets the level of anything not covered by a registered target, `all` sets every
    /// registered target, and any other key is treated as a tag.
    ///
    /// # Errors
    ///
    /// Returns [`TraceCtlError`] if the string is malformed; nothing is applied in that case.
    pub fn setup_from_string(&self, input: &str) -> Result<(), TraceCtlError> {
        let config = Self::parse_tracing_config(input)?;
        if let Some(level) = config.get("default") {
            self.set_default_level(*level);
        }
        if let Some(level) = config.get("all") {
            self.set_level_all(*level);
        }
        for (tag, level) in config
            .iter()
            .filter(|(tag, _)| !matches!(tag.as_str(), "default" | "all"))
        {
            self.set_tag_level(tag, *level);
        }
        Ok(())
    }

    #[must_use]
    pub fn get_target(&self, target: &str) -> Option<TargetCfg> {
        self.db().targets.get(target).cloned()
    }

    #[must_use]
    pub fn get_targets_by_tag(&self, tag: &str) -> Vec<TargetCfg> {
        let db = self.db();
        db.tags
            .get(tag)
            .map(|members| {
                db.targets
                    .values()
                    .filter(|t| members.contains(t.target))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn dump(&self) {
        let db = self.db();
        info!("{}", *db);
    }

    pub fn dump_targets_by_tag(&self) {
        let db = self.db();
        info!("{}", TargetDbByTag(&db));
    }

    #[must_use]
    pub fn as_config_string(&self) -> String {
        self.db().as_config_string()
    }
}
