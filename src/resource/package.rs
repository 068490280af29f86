//! Package resource - rpm/dnf on RedHat, dpkg/apt on Debian

use crate::runner::{CommandRunner, Invocation};
use anyhow::bail;
use declarative::{
    AttrKind, CurrentState, Ensure, Facts, Outcome, Provider, ProviderContext, ProviderResult,
    Resource, TypeSchema,
};
use std::sync::Arc;

/// Package tooling of one OS family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Backend {
    /// rpm for queries, dnf for changes
    Dnf,
    /// rpm for queries, yum for changes (release 7 and older)
    Yum,
    /// dpkg-query for queries, apt-get for changes
    Apt,
}

impl Backend {
    fn detect(facts: &Facts) -> ProviderResult<Self> {
        match facts.os_family() {
            Some("RedHat") => match facts.os_release_major() {
                Some(major) if major < 8 => Ok(Self::Yum),
                _ => Ok(Self::Dnf),
            },
            Some("Debian") => Ok(Self::Apt),
            Some(other) => bail!("No package backend for OS family {other}"),
            None => bail!("The os_family fact is not set"),
        }
    }

    fn query(self, name: &str) -> Invocation {
        match self {
            Self::Dnf | Self::Yum => Invocation::new("rpm").args(["-q", name]),
            Self::Apt => Invocation::new("dpkg-query").args(["-W", "-f=${Status}", name]),
        }
    }

    fn change(self, install: bool, name: &str) -> Invocation {
        let verb = if install { "install" } else { "remove" };
        match self {
            Self::Dnf => Invocation::new("dnf").args(["-y", "-q", verb, name]),
            Self::Yum => Invocation::new("yum").args(["-y", "-q", verb, name]),
            Self::Apt => Invocation::new("apt-get").args(["-y", "-q", verb, name]),
        }
    }
}

pub struct PackageProvider {
    runner: Arc<dyn CommandRunner>,
}

impl PackageProvider {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

impl Provider for PackageProvider {
    fn kind(&self) -> &'static str {
        "package"
    }

    fn schema(&self) -> TypeSchema {
        TypeSchema::new("package", &[Ensure::Present, Ensure::Absent]).namevar("name", AttrKind::String)
    }

    fn read_state(&self, resource: &Resource, ctx: &ProviderContext) -> ProviderResult<CurrentState> {
        let backend = Backend::detect(ctx.facts)?;
        let name = resource.name_or_title("name");
        let output = self.runner.run(&backend.query(name))?;

        let installed = match backend {
            Backend::Dnf | Backend::Yum => output.success(),
            Backend::Apt => output.success() && output.stdout.contains("install ok installed"),
        };
        Ok(if installed {
            CurrentState::new(Ensure::Present)
        } else {
            CurrentState::absent()
        })
    }

    fn apply_state(
        &self,
        resource: &Resource,
        current: &CurrentState,
        ctx: &ProviderContext,
    ) -> ProviderResult<Outcome> {
        if resource.ensure == current.ensure {
            return Ok(Outcome::NoChange);
        }
        let backend = Backend::detect(ctx.facts)?;
        let name = resource.name_or_title("name");
        let install = resource.ensure != Ensure::Absent;

        self.runner.run_checked(&backend.change(install, name))?;
        if install {
            log::info!("Installed package {name}");
            Ok(Outcome::Created)
        } else {
            log::info!("Removed package {name}");
            Ok(Outcome::Removed)
        }
    }
}
