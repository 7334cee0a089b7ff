//! The offline controller.
//!
//! When the session is offline, remote access fails unless the repository's
//! protocol or host is explicitly exempted in the session configuration.

use depot_core::repository::RemoteRepository;
use depot_core::session::Session;
use depot_util::errors::{DepotError, DepotResult};

/// Reject remote access for offline sessions, honoring exemptions.
pub fn assert_online(session: &Session, repository: &RemoteRepository) -> DepotResult<()> {
    if !session.offline {
        return Ok(());
    }
    let protocol = repository.protocol();
    if session
        .config
        .offline_protocols
        .iter()
        .any(|p| p.eq_ignore_ascii_case(&protocol))
    {
        return Ok(());
    }
    let host = repository.host();
    if session
        .config
        .offline_hosts
        .iter()
        .any(|h| h.eq_ignore_ascii_case(&host))
    {
        return Ok(());
    }
    Err(DepotError::RepositoryOffline {
        repository: repository.id.clone(),
        url: repository.url.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use depot_core::repository::LocalRepository;
    use tempfile::TempDir;

    fn offline_session() -> (TempDir, Session) {
        let tmp = TempDir::new().unwrap();
        let mut session = Session::new(LocalRepository::new(tmp.path()));
        session.offline = true;
        (tmp, session)
    }

    #[test]
    fn online_session_passes() {
        let (_tmp, mut session) = offline_session();
        session.offline = false;
        let repo = RemoteRepository::new("r", "https://r.example");
        assert!(assert_online(&session, &repo).is_ok());
    }

    #[test]
    fn offline_session_fails() {
        let (_tmp, session) = offline_session();
        let repo = RemoteRepository::new("r", "https://r.example");
        let err = assert_online(&session, &repo).unwrap_err();
        assert!(matches!(err, DepotError::RepositoryOffline { .. }));
    }

    #[test]
    fn protocol_exemption() {
        let (_tmp, mut session) = offline_session();
        session.config.offline_protocols.push("file".to_string());
        let repo = RemoteRepository::new("local-mirror", "file:///var/mirror");
        assert!(assert_online(&session, &repo).is_ok());
    }

    #[test]
    fn host_exemption_is_case_insensitive() {
        let (_tmp, mut session) = offline_session();
        session.config.offline_hosts.push("Nexus.Corp.example".to_string());
        let repo = RemoteRepository::new("corp", "https://nexus.corp.example/repo");
        assert!(assert_online(&session, &repo).is_ok());
    }
}
