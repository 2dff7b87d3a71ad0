//! TLS material for both clusters, generated with mkcert so the host's browsers trust it.

use crate::{
    command::{
        require_executable,
        CommandRunner,
        Invocation,
    },
    context::SetupSettings,
    error::{
        Error,
        Result,
    },
};
use std::{
    fs,
    path::{
        Path,
        PathBuf,
    },
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsMaterial {
    pub cert: PathBuf,
    pub key: PathBuf,
    /// mkcert's `rootCA.pem`, mounted into the clusters and stored as the private CA secret.
    pub root_ca: PathBuf,
}

/// The helper-installed mkcert if there is one, otherwise whatever `mkcert` is on PATH.
pub fn mkcert_path(helper_dir: &Path) -> String {
    let helper = helper_dir.join("bin").join("mkcert");
    if helper.exists() {
        helper.display().to_string()
    } else {
        "mkcert".to_string()
    }
}

pub async fn root_ca(runner: &dyn CommandRunner, mkcert: &str) -> Result<PathBuf> {
    let output = runner.run(Invocation::new(mkcert, ["-CAROOT"])).await?;
    let caroot = PathBuf::from(output.stdout.trim());
    if !caroot.is_dir() {
        return Err(Error::DependencyUnavailable(format!(
            "mkcert CAROOT does not exist: {}",
            caroot.display()
        )));
    }
    let root_ca = caroot.join("rootCA.pem");
    if !root_ca.is_file() {
        return Err(Error::DependencyUnavailable(format!(
            "mkcert rootCA.pem not found at: {}",
            root_ca.display()
        )));
    }
    Ok(root_ca)
}

/// Paths of previously generated material, for runs that skip generation.
pub async fn existing_tls_material(runner: &dyn CommandRunner, settings: &SetupSettings) -> Result<TlsMaterial> {
    let mkcert = mkcert_path(&settings.helper_dir);
    Ok(TlsMaterial {
        cert: settings.tls_cert_path(),
        key: settings.tls_key_path(),
        root_ca: root_ca(runner, &mkcert).await?,
    })
}

/// Generate `astronomer-tls.{pem,key}` covering `<base>`, `*.<base>`, `<dp>` and `*.<dp>`.
///
/// Always regenerates so the SANs follow the chosen data-plane prefix. The mkcert root CA is appended to the cert
/// for a full chain.
pub async fn ensure_tls_certs(runner: &dyn CommandRunner, settings: &SetupSettings) -> Result<TlsMaterial> {
    let mkcert = mkcert_path(&settings.helper_dir);
    require_executable(
        runner,
        &mkcert,
        "Install mkcert (or run `python3 bin/install-ci-tools.py` to install the repo-pinned version).",
    )
    .await?;

    let certs_dir = settings.certs_dir();
    fs::create_dir_all(&certs_dir).map_err(|err| Error::io(&certs_dir, err))?;
    let cert = settings.tls_cert_path();
    let key = settings.tls_key_path();

    let root_ca = root_ca(runner, &mkcert).await?;

    info!("Generating TLS certificates via mkcert (overwrites existing astronomer-tls.{{pem,key}})");
    runner.run(Invocation::new(mkcert.as_str(), ["-install"])).await?;

    let base = &settings.base_domain;
    let dp = settings.dp_domain();
    runner
        .run(Invocation::new(
            mkcert.as_str(),
            [
                format!("-cert-file={}", cert.display()),
                format!("-key-file={}", key.display()),
                base.to_string(),
                format!("*.{base}"),
                dp.clone(),
                format!("*.{dp}"),
            ],
        ))
        .await?;

    if !cert.is_file() || !key.is_file() {
        return Err(Error::DependencyUnavailable(format!(
            "mkcert did not produce {} / {}",
            cert.display(),
            key.display()
        )));
    }

    if append_root_ca(&cert, &root_ca)? {
        debug!(cert = %cert.display(), "appended mkcert root CA to certificate");
    }

    Ok(TlsMaterial { cert, key, root_ca })
}

/// Append the root CA to the cert unless it is already part of it. Returns whether anything was written.
fn append_root_ca(cert: &Path, root_ca: &Path) -> Result<bool> {
    let root_ca_pem = fs::read(root_ca).map_err(|err| Error::io(root_ca, err))?;
    let mut cert_pem = fs::read(cert).map_err(|err| Error::io(cert, err))?;

    if root_ca_pem.is_empty() || cert_pem.windows(root_ca_pem.len()).any(|window| window == root_ca_pem.as_slice()) {
        return Ok(false);
    }

    cert_pem.push(b'\n');
    cert_pem.extend_from_slice(&root_ca_pem);
    fs::write(cert, cert_pem).map_err(|err| Error::io(cert, err))?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        context::test_settings,
        testing::ScriptedRunner,
    };

    const ROOT_CA: &str = "-----BEGIN CERTIFICATE-----\nROOT\n-----END CERTIFICATE-----\n";

    #[test]
    fn root_ca_is_appended_once() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("astronomer-tls.pem");
        let root_ca = dir.path().join("rootCA.pem");
        fs::write(&cert, "-----BEGIN CERTIFICATE-----\nLEAF\n-----END CERTIFICATE-----\n").unwrap();
        fs::write(&root_ca, ROOT_CA).unwrap();

        assert!(append_root_ca(&cert, &root_ca).unwrap());
        assert!(!append_root_ca(&cert, &root_ca).unwrap());

        let chain = fs::read_to_string(&cert).unwrap();
        assert_eq!(chain.matches("ROOT").count(), 1);
        assert!(chain.starts_with("-----BEGIN CERTIFICATE-----\nLEAF"));
    }

    #[test]
    fn prefers_helper_installed_mkcert() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(mkcert_path(dir.path()), "mkcert");

        fs::create_dir_all(dir.path().join("bin")).unwrap();
        fs::write(dir.path().join("bin").join("mkcert"), "").unwrap();
        assert_eq!(mkcert_path(dir.path()), dir.path().join("bin/mkcert").display().to_string());
    }

    #[tokio::test]
    async fn missing_caroot_is_dependency_unavailable() {
        let runner = ScriptedRunner::new().on(&["mkcert", "-CAROOT"], "/nonexistent/mkcert\n");

        let err = root_ca(&runner, "mkcert").await.unwrap_err();

        assert!(matches!(err, Error::DependencyUnavailable(_)), "{err:?}");
    }

    #[tokio::test]
    async fn generates_certs_with_cp_and_dp_sans() {
        let helper = tempfile::tempdir().unwrap();
        let caroot = tempfile::tempdir().unwrap();
        fs::write(caroot.path().join("rootCA.pem"), ROOT_CA).unwrap();

        let settings = SetupSettings {
            helper_dir: helper.path().to_path_buf(),
            ..test_settings()
        };
        // mkcert itself is faked, so the files it would write are laid down up front.
        fs::create_dir_all(settings.certs_dir()).unwrap();
        fs::write(settings.tls_cert_path(), "LEAF\n").unwrap();
        fs::write(settings.tls_key_path(), "KEY\n").unwrap();

        let runner = ScriptedRunner::new()
            .on(&["sh", "-c", "command -v mkcert"], "/usr/local/bin/mkcert\n")
            .on(&["mkcert", "-CAROOT"], &format!("{}\n", caroot.path().display()));

        let material = ensure_tls_certs(&runner, &settings).await.unwrap();

        assert_eq!(material.root_ca, caroot.path().join("rootCA.pem"));
        assert_eq!(material.cert, settings.tls_cert_path());
        let generate = runner.calls_matching(&["localtest.me", "*.localtest.me", "dp01.localtest.me", "*.dp01.localtest.me"]);
        assert_eq!(generate.len(), 1);
        assert_eq!(runner.calls_matching(&["mkcert", "-install"]).len(), 1);
        assert_eq!(fs::read_to_string(&material.cert).unwrap(), format!("LEAF\n\n{ROOT_CA}"));
    }
}
