use std::fmt::{self, Display, Formatter};


/// The outcome category of a single installation step.
#[allow(non_camel_case_types)]
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone, Copy)]
pub enum InstallCode {
    OK,
    ALREADY_PROCESSED,
    NEED_COMPLETION,
    VERIFICATION_FAILED,
    DOWNLOAD_FAILED,
    INSTALL_FAILED,
    INTERNAL_ERROR,
}

impl InstallCode {
    pub fn is_success(&self) -> bool {
        match *self {
            InstallCode::OK
            | InstallCode::ALREADY_PROCESSED
            | InstallCode::NEED_COMPLETION => true,
            _ => false
        }
    }
}

impl Display for InstallCode {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}


/// An installation outcome with any detail from the backend.
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct InstallOutcome {
    pub code:   InstallCode,
    pub detail: String,
}

impl InstallOutcome {
    pub fn new(code: InstallCode, detail: String) -> Self {
        InstallOutcome { code: code, detail: detail }
    }

    pub fn ok() -> Self {
        InstallOutcome::new(InstallCode::OK, "".into())
    }

    pub fn error(detail: String) -> Self {
        InstallOutcome::new(InstallCode::INSTALL_FAILED, detail)
    }

    pub fn is_success(&self) -> bool {
        self.code.is_success()
    }

    /// Attach the installed target name for reporting in a manifest.
    pub fn into_result(self, id: String) -> OperationResult {
        OperationResult { id: id, result_code: self.code, result_text: self.detail }
    }
}

/// The per-target result included in an ECU's version report.
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct OperationResult {
    pub id:          String,
    pub result_code: InstallCode,
    pub result_text: String,
}


/// Whether an installed version is the running one or staged for the
/// next reboot. At most one version per ECU may be pending.
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone, Copy)]
pub enum InstallMode {
    Current,
    Pending,
}


/// An installed software package reported to the server.
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub struct Package {
    pub name:    String,
    pub version: String,
}

impl Display for Package {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{} {}", self.name, self.version)
    }
}
