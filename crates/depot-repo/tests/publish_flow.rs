//! Install and deploy working against the same artifacts.

use depot_core::artifact::Artifact;
use depot_core::repository::{LocalRepository, RemoteRepository};
use depot_core::session::Session;
use depot_repo::deploy::{DeployRequest, Deployer};
use depot_repo::install::{InstallRequest, Installer};
use depot_repo::local::{EnhancedLocalRepositoryManager, LocalArtifactRequest};
use depot_repo::versions::parse_versions;
use tempfile::TempDir;

struct Fixture {
    _tmp: TempDir,
    session: Session,
    repository: RemoteRepository,
    remote_root: std::path::PathBuf,
    staging: std::path::PathBuf,
}

fn fixture() -> Fixture {
    let tmp = TempDir::new().unwrap();
    let remote_root = tmp.path().join("remote");
    let staging = tmp.path().join("staging");
    std::fs::create_dir_all(&remote_root).unwrap();
    std::fs::create_dir_all(&staging).unwrap();
    let session = Session::new(LocalRepository::new(&tmp.path().join("local")));
    let repository =
        RemoteRepository::new("releases", &format!("file://{}", remote_root.display()));
    Fixture {
        _tmp: tmp,
        session,
        repository,
        remote_root,
        staging,
    }
}

fn staged(fixture: &Fixture, name: &str, version: &str, bytes: &[u8]) -> Artifact {
    let file = fixture.staging.join(format!("{name}-{version}.jar"));
    std::fs::write(&file, bytes).unwrap();
    Artifact::new("org.demo", name, "jar", version).with_file(file)
}

#[test]
fn install_then_find_returns_identical_bytes() {
    let f = fixture();
    let artifact = staged(&f, "core", "1.0", b"core bytes");

    let installer = Installer::new(&f.session.config);
    installer
        .install(&f.session, InstallRequest::new(vec![artifact.clone()]))
        .unwrap();

    let manager = EnhancedLocalRepositoryManager::new(&f.session).unwrap();
    let found = manager.find_artifact(&LocalArtifactRequest {
        artifact: &artifact,
        repositories: &[],
        context: "",
    });
    assert!(found.available);
    assert_eq!(std::fs::read(found.file.unwrap()).unwrap(), b"core bytes");
}

#[test]
fn install_and_deploy_share_one_version_history() {
    let f = fixture();
    let installer = Installer::new(&f.session.config);
    let deployer = Deployer::new(&f.session.config);

    for version in ["1.0", "1.1"] {
        let artifact = staged(&f, "core", version, version.as_bytes());
        installer
            .install(&f.session, InstallRequest::new(vec![artifact.clone()]))
            .unwrap();
        deployer
            .deploy(
                &f.session,
                DeployRequest::new(f.repository.clone(), vec![artifact]),
            )
            .unwrap();
    }

    let local_index = f
        .session
        .local_repository
        .base_dir
        .join("org/demo/core/maven-metadata-local.xml");
    let local = parse_versions(&std::fs::read_to_string(local_index).unwrap()).unwrap();
    assert_eq!(local.versions, vec!["1.0", "1.1"]);

    let remote_index = f.remote_root.join("org/demo/core/maven-metadata.xml");
    let remote = parse_versions(&std::fs::read_to_string(remote_index).unwrap()).unwrap();
    assert_eq!(remote.versions, vec!["1.0", "1.1"]);
    assert_eq!(remote.latest.as_deref(), Some("1.1"));
    assert_eq!(remote.release.as_deref(), Some("1.1"));
}

#[test]
fn deployed_artifact_is_resolvable_by_checksum() {
    let f = fixture();
    let artifact = staged(&f, "core", "2.0", b"publish me");
    Deployer::new(&f.session.config)
        .deploy(
            &f.session,
            DeployRequest::new(f.repository.clone(), vec![artifact]),
        )
        .unwrap();

    let uploaded = f.remote_root.join("org/demo/core/2.0/core-2.0.jar");
    assert_eq!(
        std::fs::read_to_string(f.remote_root.join("org/demo/core/2.0/core-2.0.jar.sha256"))
            .unwrap(),
        depot_util::hash::sha256_hex(b"publish me")
    );
    assert_eq!(
        std::fs::read_to_string(f.remote_root.join("org/demo/core/2.0/core-2.0.jar.sha1"))
            .unwrap(),
        depot_util::hash::sha1_hex(b"publish me")
    );
    assert_eq!(std::fs::read(uploaded).unwrap(), b"publish me");
}
