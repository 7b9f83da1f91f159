use chan::{self, Receiver, Sender};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

use client::{OtaClient, UpdateCheck, UpdateTarget};
use datatype::{Error, InstallOutcome};
use download::FlowControlToken;


/// A single-shot operation executed by the worker in queue order.
pub enum Command {
    SendDeviceData,
    FetchMeta,
    Download(Vec<UpdateTarget>),
    Install(Vec<UpdateTarget>),
    PutManifest,
    CompleteInstall,
}

/// The result delivered back on a command's response channel.
pub enum Outcome {
    DeviceDataSent,
    Updates(UpdateCheck),
    Downloaded(HashMap<String, String>),
    Installed(Vec<(String, InstallOutcome)>),
    ManifestSent,
    InstallCompleted,
    Failed(Error),
}

/// Drives an `OtaClient` from a single worker thread: commands run to
/// completion in submission order, sharing one flow-control token.
/// Aborting is sticky and drains queued commands promptly; `reset`
/// makes the queue usable again.
pub struct CommandQueue {
    tx:    Sender<(Command, Sender<Outcome>)>,
    token: Arc<FlowControlToken>,
}

impl CommandQueue {
    pub fn new(mut ota: OtaClient) -> Self {
        let token = Arc::new(FlowControlToken::default());
        let worker_token = token.clone();
        let (tx, rx) = chan::async::<(Command, Sender<Outcome>)>();

        thread::spawn(move || {
            for (command, resp_tx) in rx {
                if !worker_token.can_continue(false) {
                    resp_tx.send(Outcome::Failed(Error::Aborted));
                    continue;
                }
                resp_tx.send(execute(&mut ota, command, &worker_token));
            }
        });

        CommandQueue { tx: tx, token: token }
    }

    /// Submit a command, returning the channel its outcome arrives on.
    pub fn enqueue(&self, command: Command) -> Receiver<Outcome> {
        let (resp_tx, resp_rx) = chan::async::<Outcome>();
        self.tx.send((command, resp_tx));
        resp_rx
    }

    pub fn pause(&self, pause: bool) -> bool {
        self.token.set_pause(pause)
    }

    pub fn abort(&self) -> bool {
        self.token.set_abort()
    }

    pub fn reset(&self) {
        self.token.reset();
    }

    pub fn token(&self) -> Arc<FlowControlToken> {
        self.token.clone()
    }
}

fn execute(ota: &mut OtaClient, command: Command, token: &FlowControlToken) -> Outcome {
    match command {
        Command::SendDeviceData => match ota.send_device_data() {
            Ok(()) => Outcome::DeviceDataSent,
            Err(err) => Outcome::Failed(err)
        },

        Command::FetchMeta => match ota.fetch_meta() {
            Ok(check) => Outcome::Updates(check),
            Err(err) => Outcome::Failed(err)
        },

        Command::Download(targets) => match ota.download_images(&targets, token) {
            Ok(staged) => Outcome::Downloaded(staged),
            Err(err) => Outcome::Failed(err)
        },

        Command::Install(targets) => match ota.uptane_install(&targets) {
            Ok(reports) => Outcome::Installed(reports),
            Err(err) => Outcome::Failed(err)
        },

        Command::PutManifest => match ota.put_manifest() {
            Ok(()) => Outcome::ManifestSent,
            Err(err) => Outcome::Failed(err)
        },

        Command::CompleteInstall => match ota.complete_install() {
            Ok(()) => Outcome::InstallCompleted,
            Err(err) => Outcome::Failed(err)
        },
    }
}
