//! Remote cache initializer.
//!
//! A cache is `Initialized` once its root descriptor (`nix-cache-info`)
//! exists. The descriptor is probed on every run; only a definite "not
//! found" (or a forced run) triggers `oranc push ... initialize`. Anything
//! else the probe sees is fatal, so the initializer never guesses.

use std::time::Duration;

use storepush_core::{CommandRunner, InitializeMode, InitializeParams};

use crate::error::{utility_failure, SyncError};
use crate::utility::PushUtility;

/// Well-known path of a binary cache's root descriptor.
pub const ROOT_DESCRIPTOR: &str = "nix-cache-info";

/// What the endpoint said about the root descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeResponse {
    Found,
    NotFound,
    /// Any other status, or a transport failure.
    Unexpected(String),
}

pub trait CacheProbe {
    fn probe(&self, url: &str) -> ProbeResponse;
}

/// Probes over HTTP with `ureq`.
pub struct HttpProbe {
    agent: ureq::Agent,
}

impl HttpProbe {
    pub fn new(timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }
}

impl Default for HttpProbe {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl CacheProbe for HttpProbe {
    fn probe(&self, url: &str) -> ProbeResponse {
        match self.agent.get(url).call() {
            Ok(response) if (200..300).contains(&response.status()) => ProbeResponse::Found,
            Ok(response) => ProbeResponse::Unexpected(format!("HTTP {}", response.status())),
            Err(ureq::Error::Status(404, _)) => ProbeResponse::NotFound,
            Err(ureq::Error::Status(code, _)) => ProbeResponse::Unexpected(format!("HTTP {code}")),
            Err(ureq::Error::Transport(transport)) => ProbeResponse::Unexpected(transport.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Uninitialized,
    Initialized,
}

/// What [`ensure_initialized`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    /// The descriptor already existed; nothing was run.
    AlreadyInitialized,
    /// The utility created the descriptor.
    Initialized { forced: bool },
    /// Initialization is disabled by configuration.
    Skipped,
}

/// `<cache_url>/nix-cache-info`
pub fn descriptor_url(cache_url: &str) -> String {
    format!("{}/{ROOT_DESCRIPTOR}", cache_url.trim_end_matches('/'))
}

/// Probe the descriptor and map the response onto [`CacheState`].
pub fn probe_state(probe: &dyn CacheProbe, cache_url: &str) -> Result<CacheState, SyncError> {
    let url = descriptor_url(cache_url);
    match probe.probe(&url) {
        ProbeResponse::Found => Ok(CacheState::Initialized),
        ProbeResponse::NotFound => Ok(CacheState::Uninitialized),
        ProbeResponse::Unexpected(detail) => Err(SyncError::InitializationProbe { url, detail }),
    }
}

/// Move the cache to `Initialized` if it is not there yet.
pub fn ensure_initialized(
    runner: &dyn CommandRunner,
    probe: &dyn CacheProbe,
    utility: &PushUtility,
    params: &InitializeParams,
    cache_url: &str,
) -> Result<InitOutcome, SyncError> {
    let forced = match params.mode {
        InitializeMode::Skip => return Ok(InitOutcome::Skipped),
        InitializeMode::Force => true,
        InitializeMode::Auto => match probe_state(probe, cache_url)? {
            CacheState::Initialized => {
                tracing::info!(cache = %cache_url, "cache already initialized");
                return Ok(InitOutcome::AlreadyInitialized);
            }
            CacheState::Uninitialized => false,
        },
    };

    let invocation = utility.initialize_invocation(params);
    let output = runner.run(&invocation)?;
    if !output.success() {
        return Err(utility_failure(&invocation, &output));
    }
    tracing::info!(cache = %cache_url, forced, priority = params.priority, "initialized cache");
    Ok(InitOutcome::Initialized { forced })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use rstest::rstest;
    use std::collections::VecDeque;
    use storepush_core::{CommandOutput, Repository, ScriptedRunner};

    /// Answers from a queue, repeating the last answer.
    struct FakeProbe {
        responses: RefCell<VecDeque<ProbeResponse>>,
        urls: RefCell<Vec<String>>,
    }

    impl FakeProbe {
        fn new(responses: impl IntoIterator<Item = ProbeResponse>) -> Self {
            Self {
                responses: RefCell::new(responses.into_iter().collect()),
                urls: RefCell::new(Vec::new()),
            }
        }
    }

    impl CacheProbe for FakeProbe {
        fn probe(&self, url: &str) -> ProbeResponse {
            self.urls.borrow_mut().push(url.to_string());
            let mut responses = self.responses.borrow_mut();
            if responses.len() > 1 {
                responses.pop_front().unwrap()
            } else {
                responses.front().cloned().unwrap()
            }
        }
    }

    fn utility() -> PushUtility {
        PushUtility {
            program: "oranc".to_string(),
            repository: Repository {
                registry: "ghcr.io".to_string(),
                part1: "octo".to_string(),
                part2: "cache".to_string(),
            },
            credentials: None,
            signing_key: None,
        }
    }

    fn runner() -> ScriptedRunner {
        ScriptedRunner::new().on(&["initialize"], CommandOutput::ok(""))
    }

    const CACHE: &str = "http://172.17.0.2/ghcr.io/octo/cache";

    #[test]
    fn not_found_then_found_initializes_once() {
        let probe = FakeProbe::new([ProbeResponse::NotFound, ProbeResponse::Found]);
        let runner = runner();
        let params = InitializeParams::default();

        let first = ensure_initialized(&runner, &probe, &utility(), &params, CACHE).unwrap();
        let second = ensure_initialized(&runner, &probe, &utility(), &params, CACHE).unwrap();

        assert_eq!(first, InitOutcome::Initialized { forced: false });
        assert_eq!(second, InitOutcome::AlreadyInitialized);
        assert_eq!(runner.calls_with(&["initialize"]).len(), 1);
        assert_eq!(
            *probe.urls.borrow(),
            vec![format!("{CACHE}/nix-cache-info"), format!("{CACHE}/nix-cache-info")]
        );
    }

    #[test]
    fn found_is_a_no_op() {
        let probe = FakeProbe::new([ProbeResponse::Found]);
        let runner = runner();
        let outcome =
            ensure_initialized(&runner, &probe, &utility(), &InitializeParams::default(), CACHE)
                .unwrap();
        assert_eq!(outcome, InitOutcome::AlreadyInitialized);
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn ambiguous_probe_is_fatal() {
        let probe = FakeProbe::new([ProbeResponse::Unexpected("HTTP 502".to_string())]);
        let runner = runner();
        let err =
            ensure_initialized(&runner, &probe, &utility(), &InitializeParams::default(), CACHE)
                .unwrap_err();
        match err {
            SyncError::InitializationProbe { url, detail } => {
                assert!(url.ends_with("/nix-cache-info"));
                assert_eq!(detail, "HTTP 502");
            }
            other => panic!("expected InitializationProbe, got {other}"),
        }
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn force_skips_the_probe() {
        let probe = FakeProbe::new([ProbeResponse::Found]);
        let runner = runner();
        let params = InitializeParams {
            mode: InitializeMode::Force,
            ..InitializeParams::default()
        };
        let outcome = ensure_initialized(&runner, &probe, &utility(), &params, CACHE).unwrap();
        assert_eq!(outcome, InitOutcome::Initialized { forced: true });
        assert!(probe.urls.borrow().is_empty());
        assert_eq!(runner.calls_with(&["initialize", "--priority", "41"]).len(), 1);
    }

    #[test]
    fn skip_does_nothing() {
        let probe = FakeProbe::new([ProbeResponse::NotFound]);
        let runner = runner();
        let params = InitializeParams {
            mode: InitializeMode::Skip,
            ..InitializeParams::default()
        };
        let outcome = ensure_initialized(&runner, &probe, &utility(), &params, CACHE).unwrap();
        assert_eq!(outcome, InitOutcome::Skipped);
        assert!(probe.urls.borrow().is_empty());
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn failed_initialize_is_utility_error() {
        let probe = FakeProbe::new([ProbeResponse::NotFound]);
        let runner =
            ScriptedRunner::new().on(&["initialize"], CommandOutput::failed(1, "unauthorized"));
        let err =
            ensure_initialized(&runner, &probe, &utility(), &InitializeParams::default(), CACHE)
                .unwrap_err();
        assert!(matches!(err, SyncError::UtilityInvocation { .. }));
    }

    /// Serve a single canned HTTP response on a loopback port and return the
    /// descriptor URL to request.
    fn serve_once(status: &'static str) -> String {
        use std::io::{BufRead, BufReader, Write};
        use std::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut line = String::new();
            while reader.read_line(&mut line).unwrap() > 0 {
                if line == "\r\n" {
                    break;
                }
                line.clear();
            }
            let mut stream = stream;
            write!(
                stream,
                "HTTP/1.1 {status}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
            )
            .unwrap();
        });
        format!("http://{addr}/ghcr.io/octo/cache/{ROOT_DESCRIPTOR}")
    }

    #[rstest]
    #[case::found("200 OK", ProbeResponse::Found)]
    #[case::found_no_content("204 No Content", ProbeResponse::Found)]
    #[case::not_found("404 Not Found", ProbeResponse::NotFound)]
    #[case::bad_gateway("502 Bad Gateway", ProbeResponse::Unexpected("HTTP 502".to_string()))]
    #[case::forbidden("403 Forbidden", ProbeResponse::Unexpected("HTTP 403".to_string()))]
    fn http_status_maps_to_cache_answer(
        #[case] status: &'static str,
        #[case] expected: ProbeResponse,
    ) {
        let url = serve_once(status);
        let probe = HttpProbe::new(Duration::from_secs(5));
        assert_eq!(probe.probe(&url), expected);
    }

    #[test]
    fn http_probe_reports_transport_failure() {
        // Nothing listens on port 9 of the loopback address.
        let probe = HttpProbe::new(Duration::from_secs(2));
        let response = probe.probe("http://127.0.0.1:9/nix-cache-info");
        assert!(matches!(response, ProbeResponse::Unexpected(_)));
    }
}
