use crate::{
    command::{
        timeout_secs,
        CommandRunner,
        Invocation,
    },
    error::{
        Error,
        Result,
    },
};
use std::{
    path::Path,
    time::Duration,
};

pub struct Release<'a> {
    pub name: &'a str,
    pub chart_dir: &'a Path,
    pub namespace: &'a str,
    pub kube_context: &'a str,
    pub values_file: &'a Path,
    pub timeout: Duration,
    pub debug: bool,
}

/// Fail early with a clear message instead of letting helm complain about a missing chart.
pub fn ensure_chart(chart_dir: &Path) -> Result<()> {
    if chart_dir.join("Chart.yaml").is_file() {
        return Ok(());
    }
    Err(Error::InvalidArgument(format!(
        "{} does not contain a Chart.yaml",
        chart_dir.display()
    )))
}

pub async fn dependency_update(runner: &dyn CommandRunner, chart_dir: &Path) -> Result<()> {
    info!("Running `helm dependency update`");
    runner
        .run(Invocation::new(
            "helm",
            ["dependency".to_string(), "update".to_string(), chart_dir.display().to_string()],
        ))
        .await?;
    Ok(())
}

/// `helm upgrade --install ... --wait`, with helm's output going straight to the terminal.
pub async fn upgrade_install(runner: &dyn CommandRunner, release: &Release<'_>) -> Result<()> {
    info!(
        "Helm upgrade/install ({}): {} in ns={}",
        release.kube_context, release.name, release.namespace
    );
    runner.run(upgrade_install_command(release).streaming()).await?;
    Ok(())
}

fn upgrade_install_command(release: &Release<'_>) -> Invocation {
    let mut args = vec![
        "upgrade".to_string(),
        "--install".to_string(),
        release.name.to_string(),
        release.chart_dir.display().to_string(),
        "--namespace".to_string(),
        release.namespace.to_string(),
        "--kube-context".to_string(),
        release.kube_context.to_string(),
        "--values".to_string(),
        release.values_file.display().to_string(),
        "--timeout".to_string(),
        timeout_secs(release.timeout),
        "--wait".to_string(),
    ];
    if release.debug {
        args.push("--debug".to_string());
    }
    Invocation::new("helm", args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedRunner;

    #[tokio::test]
    async fn upgrade_install_streams_and_waits() {
        let runner = ScriptedRunner::new();
        let release = Release {
            name: "astronomer",
            chart_dir: Path::new("/src/astronomer"),
            namespace: "astronomer",
            kube_context: "k3d-control",
            values_file: Path::new("/tmp/cp-values.yaml"),
            timeout: Duration::from_secs(3600),
            debug: true,
        };

        upgrade_install(&runner, &release).await.unwrap();

        let call = &runner.calls()[0];
        assert!(call.stream);
        assert_eq!(
            call.argv,
            vec![
                "helm",
                "upgrade",
                "--install",
                "astronomer",
                "/src/astronomer",
                "--namespace",
                "astronomer",
                "--kube-context",
                "k3d-control",
                "--values",
                "/tmp/cp-values.yaml",
                "--timeout",
                "3600s",
                "--wait",
                "--debug",
            ]
        );
    }

    #[test]
    fn fractional_timeout_rounds_up() {
        let release = Release {
            name: "astronomer",
            chart_dir: Path::new("."),
            namespace: "astronomer",
            kube_context: "k3d-data",
            values_file: Path::new("dp-values.yaml"),
            timeout: Duration::from_millis(1500),
            debug: false,
        };

        assert!(upgrade_install_command(&release).contains(&["--timeout", "2s", "--wait"]));
    }

    #[test]
    fn chart_dir_must_hold_a_chart() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(ensure_chart(dir.path()), Err(Error::InvalidArgument(_))));

        std::fs::write(dir.path().join("Chart.yaml"), "name: astronomer\n").unwrap();
        ensure_chart(dir.path()).unwrap();
    }
}
