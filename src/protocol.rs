//! Wire constants and URL layout of the grid server.

use reqwest::Url;

use crate::config::ResourceIdentity;
use crate::error::{ResourceError, Result};

pub const HTTP_OK: u16 = 200;
pub const HTTP_NOT_FOUND: u16 = 404;

/// Protocol code a cgi endpoint writes as its first body line on success.
pub const PROTOCOL_OK: i32 = 0;
pub const PROTOCOL_ERROR: i32 = 1;

/// Builds every server URL the resource uses.
#[derive(Debug, Clone)]
pub struct Endpoints {
    base: Url,
}

impl Endpoints {
    pub fn new(server: &str) -> Result<Self> {
        let base = Url::parse(server).map_err(|e| ResourceError::Malformed {
            context: "server URL".to_string(),
            detail: format!("{server}: {e}"),
        })?;
        if base.cannot_be_a_base() {
            return Err(ResourceError::Malformed {
                context: "server URL".to_string(),
                detail: format!("{server} cannot carry a path"),
            });
        }
        Ok(Self { base })
    }

    pub fn server(&self) -> &str {
        self.base.as_str().trim_end_matches('/')
    }

    fn join(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn cgi(&self, script: &str, params: &[(&str, &str)]) -> String {
        let mut url = self.join(&["cgi-sid", script]);
        url.query_pairs_mut().extend_pairs(params);
        url.into()
    }

    /// Ask the scheduler for a new job on behalf of this resource.
    pub fn request_job(&self, identity: &ResourceIdentity, exe: &str, local_name: &str) -> String {
        let cputime = identity.cputime.to_string();
        self.cgi(
            "requestnewjob",
            &[
                ("unique_resource_name", identity.resource_name.as_str()),
                ("cputime", cputime.as_str()),
                ("sandboxkey", identity.sandbox_key.as_str()),
                ("exe", exe),
                ("localjobname", local_name),
            ],
        )
    }

    /// Job description the scheduler generates for a requested job.
    pub fn input_files(&self, local_name: &str) -> String {
        self.join(&["sid_redirect", &format!("{local_name}.getinputfiles")])
            .into()
    }

    /// Job file holding the `execute:` directives.
    pub fn job_file(&self, session_id: &str) -> String {
        self.join(&["sid_redirect", &format!("{session_id}.job")]).into()
    }

    /// Descriptor naming where status, stderr and stdout are delivered.
    pub fn send_outputs(&self, session_id: &str) -> String {
        self.join(&["sid_redirect", &format!("{session_id}.sendoutputfiles")])
            .into()
    }

    /// Range file access without a byte range (create, delete).
    pub fn file(&self, iosession: &str, filename: &str) -> String {
        self.cgi(
            "rangefileaccess.py",
            &[("iosessionid", iosession), ("filename", filename)],
        )
    }

    /// Range file access for bytes `[start, end]`.
    pub fn file_range(&self, iosession: &str, filename: &str, start: u64, end: u64) -> String {
        let start = start.to_string();
        let end = end.to_string();
        self.cgi(
            "rangefileaccess.py",
            &[
                ("iosessionid", iosession),
                ("filename", filename),
                ("file_startpos", start.as_str()),
                ("file_endpos", end.as_str()),
            ],
        )
    }

    /// Server-side copy of `src` to `dst` within an io-session.
    pub fn copy(&self, iosession: &str, src: &str, dst: &str) -> String {
        self.cgi(
            "cp.py",
            &[("iosessionid", iosession), ("src", src), ("dst", dst)],
        )
    }

    /// Raw object stored under an io-session.
    pub fn session_object(&self, iosession: &str, name: &str) -> String {
        self.join(&["sid_redirect", iosession, name]).into()
    }

    /// Whether the server still wants the job bound to `iosession`.
    pub fn liveness(&self, iosession: &str) -> String {
        self.cgi("isjobactive.py", &[("iosessionid", iosession)])
    }
}

/// Object name of the numbered snapshot of `command` for `job_id`.
pub fn snapshot_name(job_id: &str, command: &str, checkpoint: u32) -> String {
    format!("{job_id}.{command}.checkpoint.{checkpoint}")
}

/// Object name of the marker pointing at the latest complete snapshot.
pub fn latest_marker_name(job_id: &str, command: &str) -> String {
    format!("{job_id}.{command}.checkpoint.latest")
}

/// Object name of the checkpoint copy of `filename`.
pub fn file_checkpoint_name(job_id: &str, filename: &str, checkpoint: u32) -> String {
    format!("{job_id}.{filename}.checkpoint.{checkpoint}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoints() -> Endpoints {
        Endpoints::new("https://grid.example.org").unwrap()
    }

    #[test]
    fn request_job_carries_identity() {
        let id = ResourceIdentity::new("https://grid.example.org", "s3cret")
            .with_resource_name("res.0")
            .with_cputime(100);
        let url = endpoints().request_job(&id, "oneclick", "1700000000000");
        assert_eq!(
            url,
            "https://grid.example.org/cgi-sid/requestnewjob?unique_resource_name=res.0\
             &cputime=100&sandboxkey=s3cret&exe=oneclick&localjobname=1700000000000"
        );
    }

    #[test]
    fn sid_redirect_documents() {
        let ep = endpoints();
        assert_eq!(
            ep.input_files("42"),
            "https://grid.example.org/sid_redirect/42.getinputfiles"
        );
        assert_eq!(ep.job_file("abc"), "https://grid.example.org/sid_redirect/abc.job");
        assert_eq!(
            ep.send_outputs("abc"),
            "https://grid.example.org/sid_redirect/abc.sendoutputfiles"
        );
        assert_eq!(
            ep.session_object("io1", "j.copyjob.checkpoint.latest"),
            "https://grid.example.org/sid_redirect/io1/j.copyjob.checkpoint.latest"
        );
    }

    #[test]
    fn range_urls_encode_filenames() {
        let url = endpoints().file_range("io1", "my file&x.txt", 0, 2047);
        assert_eq!(
            url,
            "https://grid.example.org/cgi-sid/rangefileaccess.py?iosessionid=io1\
             &filename=my+file%26x.txt&file_startpos=0&file_endpos=2047"
        );
    }

    #[test]
    fn base_path_is_kept() {
        let ep = Endpoints::new("https://host/mig/").unwrap();
        assert_eq!(ep.liveness("io"), "https://host/mig/cgi-sid/isjobactive.py?iosessionid=io");
        assert_eq!(ep.server(), "https://host/mig");
    }

    #[test]
    fn rejects_bad_server() {
        assert!(Endpoints::new("not a url").is_err());
        assert!(Endpoints::new("mailto:someone@example.org").is_err());
    }

    #[test]
    fn checkpoint_names() {
        assert_eq!(snapshot_name("7", "copyjob", 3), "7.copyjob.checkpoint.3");
        assert_eq!(latest_marker_name("7", "copyjob"), "7.copyjob.checkpoint.latest");
        assert_eq!(file_checkpoint_name("7", "out.txt", 2), "7.out.txt.checkpoint.2");
    }
}
