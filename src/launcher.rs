use crate::{
    errors::LaunchError,
    job::{ContainerTemplate, JobHandle, JobScript, JobSubmitter},
    render::CommandRenderer,
    sweep::Sweep,
};

#[derive(Debug, Default)]
pub struct LaunchSummary {
    /// Number of experiments in the sweep.
    pub planned: usize,
    pub handles: Vec<JobHandle>,
    /// Scripts rendered but not handed to the submitter, in dry-run mode.
    pub skipped: Vec<JobScript>,
}

/// Drives every experiment of a sweep through render, materialize and submit.
pub struct Launcher<S: JobSubmitter> {
    renderer: CommandRenderer,
    container: ContainerTemplate,
    submitter: S,
    dry_run: bool,
}

impl<S: JobSubmitter> Launcher<S> {
    pub fn new(renderer: CommandRenderer, container: ContainerTemplate, submitter: S) -> Self {
        Self {
            renderer,
            container,
            submitter,
            dry_run: false,
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn submitter(&self) -> &S {
        &self.submitter
    }

    pub fn into_submitter(self) -> S {
        self.submitter
    }

    /// Stops at the first error; jobs submitted before it stay submitted.
    pub fn run(&mut self, sweep: &Sweep) -> Result<LaunchSummary, LaunchError> {
        let size = sweep.len();
        let mut summary = LaunchSummary {
            planned: size,
            ..LaunchSummary::default()
        };
        log::info!("Launching {} experiments", size);
        for experiment in sweep.experiments() {
            let command = self.renderer.render_experiment(&experiment)?;
            let script =
                JobScript::new(experiment.exp_name.clone(), self.container.wrap(&command));
            if self.dry_run {
                log::info!("{}", command);
                summary.skipped.push(script);
                continue;
            }
            let path = self.submitter.materialize(&script)?;
            let handle = self.submitter.submit(&path)?;
            log::debug!(
                "Submitted {} ({}/{})",
                path.display(),
                experiment.index,
                size
            );
            summary.handles.push(handle);
        }
        Ok(summary)
    }
}
