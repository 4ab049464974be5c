//! Console driver: stdin commands that script a `LocalLedger` and the engine.
//!
//! One command per line:
//!
//! ```text
//! login <address>                      logout
//! balance <address> <amount> [block]   spaces <address> <count> [block]
//! drop <address>                       disconnect
//! reconnect                            route <path>
//! step <name>                          actions <true|false>
//! state                                help
//! quit
//! ```

use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::watch;

use crate::channels::LocalLedger;
use crate::error::{self, CommandError, OnboardingError};
use crate::onboarding::{EngineState, Identity, OnboardingEngine, Step};

const HELP: &str = "commands: login <addr> | logout | balance <addr> <amount> [block] | \
spaces <addr> <count> [block] | drop <addr> | disconnect | reconnect | route <path> | \
step <name> | actions <true|false> | state | quit";

/// A parsed console command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Login(String),
    Logout,
    Balance {
        address: String,
        amount: Decimal,
        block: Option<u64>,
    },
    Spaces {
        address: String,
        count: u32,
        block: Option<u64>,
    },
    Drop(String),
    Disconnect,
    Reconnect,
    Route(String),
    Step(Step),
    Actions(bool),
    State,
    Help,
    Quit,
}

impl Command {
    /// Parse one input line. Blank lines and `#` comments yield `None`.
    pub fn parse(line: &str) -> Result<Option<Command>, CommandError> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }
        let mut words = line.split_whitespace();
        let Some(name) = words.next() else {
            return Ok(None);
        };

        let command = match name.to_lowercase().as_str() {
            "login" => Command::Login(required(&mut words, "login", "address")?.to_string()),
            "logout" => Command::Logout,
            "balance" => {
                let address = required(&mut words, "balance", "address")?.to_string();
                let amount = required(&mut words, "balance", "amount")?;
                let amount = amount
                    .parse::<Decimal>()
                    .map_err(|_| CommandError::InvalidArgument {
                        argument: "amount",
                        value: amount.to_string(),
                    })?;
                Command::Balance {
                    address,
                    amount,
                    block: optional_block(words.next())?,
                }
            }
            "spaces" => {
                let address = required(&mut words, "spaces", "address")?.to_string();
                let count = required(&mut words, "spaces", "count")?;
                let count = count.parse::<u32>().map_err(|_| CommandError::InvalidArgument {
                    argument: "count",
                    value: count.to_string(),
                })?;
                Command::Spaces {
                    address,
                    count,
                    block: optional_block(words.next())?,
                }
            }
            "drop" => Command::Drop(required(&mut words, "drop", "address")?.to_string()),
            "disconnect" => Command::Disconnect,
            "reconnect" => Command::Reconnect,
            "route" => Command::Route(required(&mut words, "route", "path")?.to_string()),
            "step" => {
                let step = required(&mut words, "step", "name")?;
                Command::Step(step.parse().map_err(|_| CommandError::InvalidArgument {
                    argument: "step",
                    value: step.to_string(),
                })?)
            }
            "actions" => {
                let value = required(&mut words, "actions", "true|false")?;
                Command::Actions(value.parse().map_err(|_| CommandError::InvalidArgument {
                    argument: "flag",
                    value: value.to_string(),
                })?)
            }
            "state" => Command::State,
            "help" | "?" => Command::Help,
            "quit" | "exit" | "/quit" => Command::Quit,
            other => return Err(CommandError::Unknown(other.to_string())),
        };
        Ok(Some(command))
    }
}

fn required<'a>(
    words: &mut impl Iterator<Item = &'a str>,
    command: &'static str,
    argument: &'static str,
) -> Result<&'a str, CommandError> {
    words
        .next()
        .ok_or(CommandError::MissingArgument { command, argument })
}

fn optional_block(word: Option<&str>) -> Result<Option<u64>, CommandError> {
    word.map(|b| {
        b.parse::<u64>().map_err(|_| CommandError::InvalidArgument {
            argument: "block",
            value: b.to_string(),
        })
    })
    .transpose()
}

/// What the caller should do after a command ran.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Continue,
    Print(String),
    Quit,
}

/// Applies commands to a ledger feed, an identity source and an engine.
pub struct Console {
    engine: Arc<OnboardingEngine>,
    ledger: Arc<LocalLedger>,
    identity_tx: watch::Sender<Identity>,
}

impl Console {
    /// `identity_tx` should feed the engine's identity follower.
    pub fn new(
        engine: Arc<OnboardingEngine>,
        ledger: Arc<LocalLedger>,
        identity_tx: watch::Sender<Identity>,
    ) -> Self {
        Self {
            engine,
            ledger,
            identity_tx,
        }
    }

    /// Parse and run one input line.
    pub async fn execute_line(&self, line: &str) -> error::Result<Outcome> {
        match Command::parse(line)? {
            Some(command) => Ok(self.execute(command).await?),
            None => Ok(Outcome::Continue),
        }
    }

    pub async fn execute(&self, command: Command) -> Result<Outcome, OnboardingError> {
        match command {
            Command::Login(address) => {
                self.identity_tx.send_replace(Identity::logged_in(address));
            }
            Command::Logout => {
                self.identity_tx.send_replace(Identity::logged_out());
            }
            Command::Balance {
                address,
                amount,
                block,
            } => self.ledger.set_balance(&address, amount, block).await,
            Command::Spaces {
                address,
                count,
                block,
            } => self.ledger.set_space_count(&address, count, block).await,
            Command::Drop(address) => self.ledger.drop_subscriptions(&address),
            Command::Disconnect => self.ledger.disconnect(),
            Command::Reconnect => self.ledger.reconnect(),
            Command::Route(path) => self.engine.set_route(path),
            Command::Step(step) => {
                self.engine.advance_step(step)?;
            }
            Command::Actions(value) => self.engine.set_aux_action(value)?,
            Command::State => return Ok(Outcome::Print(render(&self.engine.state()))),
            Command::Help => return Ok(Outcome::Print(HELP.to_string())),
            Command::Quit => return Ok(Outcome::Quit),
        }
        Ok(Outcome::Continue)
    }

    /// Read commands line by line until EOF or `quit`.
    pub async fn run<R>(&self, reader: R) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = reader.lines();
        eprint!("> ");
        while let Some(line) = lines.next_line().await? {
            match self.execute_line(&line).await {
                Ok(Outcome::Continue) => {}
                Ok(Outcome::Print(text)) => println!("{text}"),
                Ok(Outcome::Quit) => break,
                Err(e) => eprintln!("{e}"),
            }
            eprint!("> ");
        }
        Ok(())
    }
}

/// Render state as a single JSON line.
pub fn render(state: &EngineState) -> String {
    serde_json::to_string(state).unwrap_or_else(|e| format!("{{\"error\":\"{e}\"}}"))
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::channels::LedgerChannels;
    use crate::error::Error;
    use crate::config::OnboardingConfig;
    use crate::onboarding::{StepStatus, spawn_identity_follower};
    use crate::store::{CompletionStore, MemoryCompletionStore};

    #[test]
    fn parses_ledger_commands() {
        assert_eq!(
            Command::parse("balance 5Grw 1.5 12").unwrap(),
            Some(Command::Balance {
                address: "5Grw".into(),
                amount: dec!(1.5),
                block: Some(12),
            })
        );
        assert_eq!(
            Command::parse("spaces 5Grw 0").unwrap(),
            Some(Command::Spaces {
                address: "5Grw".into(),
                count: 0,
                block: None,
            })
        );
        assert_eq!(
            Command::parse("  LOGIN 5Grw ").unwrap(),
            Some(Command::Login("5Grw".into()))
        );
    }

    #[test]
    fn parses_presentation_commands() {
        assert_eq!(
            Command::parse("step has_no_space").unwrap(),
            Some(Command::Step(Step::HasNoSpace))
        );
        assert_eq!(
            Command::parse("actions true").unwrap(),
            Some(Command::Actions(true))
        );
        assert_eq!(
            Command::parse("route /get-started").unwrap(),
            Some(Command::Route("/get-started".into()))
        );
    }

    #[test]
    fn blank_and_comment_lines_are_skipped() {
        assert_eq!(Command::parse("").unwrap(), None);
        assert_eq!(Command::parse("   ").unwrap(), None);
        assert_eq!(Command::parse("# setup").unwrap(), None);
    }

    #[test]
    fn reports_bad_input() {
        assert_eq!(
            Command::parse("fly away"),
            Err(CommandError::Unknown("fly".into()))
        );
        assert_eq!(
            Command::parse("balance 5Grw"),
            Err(CommandError::MissingArgument {
                command: "balance",
                argument: "amount",
            })
        );
        assert!(matches!(
            Command::parse("balance 5Grw lots"),
            Err(CommandError::InvalidArgument { argument: "amount", .. })
        ));
        assert!(matches!(
            Command::parse("spaces 5Grw 1 soon"),
            Err(CommandError::InvalidArgument { argument: "block", .. })
        ));
        assert!(matches!(
            Command::parse("step onboarded"),
            Err(CommandError::InvalidArgument { argument: "step", .. })
        ));
    }

    fn console() -> (Console, Arc<OnboardingEngine>, tokio::task::JoinHandle<()>) {
        let ledger = LocalLedger::new();
        let store: Arc<dyn CompletionStore> = Arc::new(MemoryCompletionStore::new());
        let engine = Arc::new(OnboardingEngine::new(
            OnboardingConfig::default(),
            Arc::clone(&ledger) as Arc<dyn LedgerChannels>,
            store,
        ));
        let (identity_tx, identity_rx) = watch::channel(Identity::logged_out());
        let follower = spawn_identity_follower(Arc::clone(&engine), identity_rx);
        (
            Console::new(Arc::clone(&engine), ledger, identity_tx),
            engine,
            follower,
        )
    }

    #[tokio::test]
    async fn script_drives_engine_to_done() {
        let (console, engine, _follower) = console();
        let script: &[u8] = b"balance A 500\nspaces A 1\nlogin A\n";
        console.run(script).await.unwrap();

        let mut rx = engine.subscribe();
        let state = rx
            .wait_for(|s| s.current_step == Step::Done && s.status == StepStatus::Resolved)
            .await
            .unwrap()
            .clone();
        assert_eq!(state.address.as_deref(), Some("A"));
    }

    #[tokio::test]
    async fn state_command_prints_json() {
        let (console, _engine, _follower) = console();
        let outcome = console.execute(Command::State).await.unwrap();
        let Outcome::Print(text) = outcome else {
            panic!("expected printed state");
        };
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["current_step"], "logged_out");
    }

    #[tokio::test]
    async fn invalid_step_surfaces_engine_error() {
        let (console, engine, _follower) = console();
        engine.start(Identity::logged_out()).await;
        let err = console.execute(Command::Step(Step::Done)).await.unwrap_err();
        assert_eq!(
            err,
            OnboardingError::InvalidTransition {
                from: Step::LoggedOut,
                to: Step::Done,
            }
        );
        assert_eq!(console.execute(Command::Quit).await.unwrap(), Outcome::Quit);
    }

    #[tokio::test]
    async fn line_errors_keep_their_source() {
        let (console, engine, _follower) = console();
        engine.start(Identity::logged_out()).await;

        assert_eq!(
            console.execute_line("# nothing").await.unwrap(),
            Outcome::Continue
        );
        assert!(matches!(
            console.execute_line("fly away").await,
            Err(Error::Command(CommandError::Unknown(_)))
        ));
        assert!(matches!(
            console.execute_line("step done").await,
            Err(Error::Onboarding(OnboardingError::InvalidTransition { .. }))
        ));
        assert_eq!(
            console.execute_line("actions true").await.unwrap(),
            Outcome::Continue
        );
        assert!(engine.state().aux_actions_performed);
    }
}
