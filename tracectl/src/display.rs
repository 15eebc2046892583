// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Display implementations

use crate::control::{TargetCfg, TargetDb};
use std::fmt::{Display, Formatter};

macro_rules! TARGET_FMT {
    () => {
        "{:>48} │ {:>8} │ {}"
    };
}

impl Display for TargetCfg {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            TARGET_FMT!(),
            self.target,
            self.level.to_string(),
            self.tags.join(",")
        )
    }
}

impl Display for TargetDb {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f)?;
        writeln!(f, "{:>56}", "──── Tracing configuration per target ────")?;
        writeln!(f, TARGET_FMT!(), "TARGET", "LEVEL", "TAGS")?;
        for target in self.targets.values() {
            writeln!(f, "{target}")?;
        }
        write!(f, TARGET_FMT!(), "(default)", self.level.to_string(), "--")
    }
}

pub(crate) struct TargetDbByTag<'a>(pub(crate) &'a TargetDb);

impl Display for TargetDbByTag<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let db = self.0;
        writeln!(f)?;
        writeln!(f, "{:>56}", "──── Tracing targets by tag ────")?;
        for (tag, members) in &db.tags {
            writeln!(f, " {tag}:")?;
            for target in db.targets.values().filter(|t| members.contains(t.target)) {
                writeln!(f, "      {:<48} : {}", target.target, target.level)?;
            }
        }
        Ok(())
    }
}
