use crate::registry::{self, Layered, Registry, RegisterInfo, SunSpecRegistry, TableRegistry};
use crate::value::RegisterValue;
use crate::{client, output, value};
use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not start the async runtime")]
    Runtime(#[source] std::io::Error),
    #[error("could not load the register table")]
    Registry(#[source] registry::Error),
    #[error("`{0}` is neither a register number nor a known register name")]
    UnknownRegister(String),
    #[error("could not produce the output")]
    Output(#[source] output::Error),
    #[error("register access failed")]
    Client(#[source] client::Error),
    #[error("could not parse the value to write")]
    ParseValue(#[source] value::ParseValueError),
}

#[derive(clap::Parser, Clone, Debug)]
#[group(id = "commands::RegistryArgs")]
pub struct RegistryArgs {
    /// Additional register table in JSON, consulted before the built-in SunSpec table.
    ///
    /// The file holds a list of `{"address", "name", "description", "kind"}` objects.
    #[arg(long, short = 'r')]
    registry: Option<PathBuf>,
}

type CliRegistry = Layered<TableRegistry, SunSpecRegistry>;

impl RegistryArgs {
    fn load(&self) -> Result<CliRegistry, Error> {
        let over = match &self.registry {
            None => TableRegistry::default(),
            Some(path) => TableRegistry::from_path(path).map_err(Error::Registry)?,
        };
        tracing::debug!(message = "loaded register table", user_entries = over.len());
        Ok(Layered { over, under: SunSpecRegistry })
    }
}

/// Accepts both register numbers (`40092`) and register names (`W`).
fn resolve(registry: &impl Registry, register: &str) -> Result<u16, Error> {
    if let Ok(address) = register.parse::<u16>() {
        return Ok(address);
    }
    registry
        .find_by_name(register)
        .map(|info| info.address)
        .ok_or_else(|| Error::UnknownRegister(register.to_string()))
}

fn runtime() -> Result<tokio::runtime::Runtime, Error> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(Error::Runtime)
}

impl output::Record for RegisterInfo<'_> {
    const HEADERS: &'static [&'static str] = &["Address", "Name", "Kind", "Words", "Description"];
    fn cells(&self) -> Vec<String> {
        vec![
            self.address.to_string(),
            self.name.to_string(),
            self.kind.to_string(),
            self.kind.words().to_string(),
            self.description.to_string(),
        ]
    }
}

impl output::Record for RegisterValue {
    const HEADERS: &'static [&'static str] = &["Address", "Name", "Kind", "Value", "Description"];
    fn cells(&self) -> Vec<String> {
        vec![
            self.address().to_string(),
            self.name().to_string(),
            self.kind().to_string(),
            self.to_string().trim_end_matches('\0').to_string(),
            self.description().to_string(),
        ]
    }
}

pub mod registers {
    use super::*;

    /// Search and output known registers.
    #[derive(clap::Parser)]
    pub struct Args {
        #[clap(flatten)]
        output: output::Args,
        #[clap(flatten)]
        registry: RegistryArgs,
        /// Only list registers whose number, name or description contains this text.
        filter: Option<String>,
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let registry = args.registry.load()?;
        let mut output = args.output.to_output().map_err(Error::Output)?;
        for register in registry.entries() {
            if let Some(pattern) = &args.filter {
                if !register.is_match(pattern) {
                    continue;
                }
            }
            output.record(&register).map_err(Error::Output)?;
        }
        output.commit().map_err(Error::Output)
    }
}

pub mod read {
    use super::*;
    use crate::client::RegisterClient;
    use crate::connection;
    use crate::value::Kind;

    /// Read registers from a device and output their decoded values.
    #[derive(clap::Parser)]
    pub struct Args {
        #[clap(flatten)]
        connection: connection::Args,
        #[clap(flatten)]
        output: output::Args,
        #[clap(flatten)]
        registry: RegistryArgs,
        /// Decode the registers as this kind instead of the documented one.
        #[arg(long, short = 'k')]
        kind: Option<Kind>,
        /// Register numbers or names.
        #[arg(required = true)]
        registers: Vec<String>,
    }

    pub fn run(args: Args) -> Result<(), Error> {
        runtime()?.block_on(read(args))
    }

    async fn read(args: Args) -> Result<(), Error> {
        let registry = args.registry.load()?;
        let addresses = args
            .registers
            .iter()
            .map(|r| resolve(&registry, r))
            .collect::<Result<Vec<_>, _>>()?;
        let mut output = args.output.to_output().map_err(Error::Output)?;
        let mut client =
            RegisterClient::new(args.connection.transport(), registry, args.connection.unit_id());
        client.connect().await.map_err(Error::Client)?;
        for address in addresses {
            let result = match args.kind {
                Some(kind) => client.read_register(address, kind).await,
                None => client.read(address).await,
            };
            let value = match result {
                Ok(value) => value,
                Err(e) => {
                    let _ = client.disconnect().await;
                    return Err(Error::Client(e));
                }
            };
            tracing::debug!(message = "read", address, value = %value);
            output.record(&value).map_err(Error::Output)?;
        }
        client.disconnect().await.map_err(Error::Client)?;
        output.commit().map_err(Error::Output)
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use clap::Parser as _;

        #[test]
        fn read_args_parse_kind() {
            let args = Args::try_parse_from([
                "read", "--tcp", "127.0.0.1:502", "--kind", "acc32", "40092", "Hz",
            ])
            .unwrap();
            assert_eq!(args.connection.unit_id(), 1);
            assert_eq!(args.kind, Some(crate::value::Kind::Acc32));
            assert_eq!(args.registers, ["40092", "Hz"]);
        }

        #[test]
        fn read_args_reject_unknown_kind() {
            let error = Args::try_parse_from([
                "read", "--tcp", "127.0.0.1:502", "--kind", "float16", "40092",
            ])
            .err()
            .unwrap();
            assert!(error.to_string().contains("not a supported register kind"));
        }
    }
}

pub mod write {
    use super::*;
    use crate::client::RegisterClient;
    use crate::connection;
    use crate::value::Value;

    /// Write a value to a device register.
    ///
    /// The value is encoded according to the kind the register table documents.
    #[derive(clap::Parser)]
    pub struct Args {
        #[clap(flatten)]
        connection: connection::Args,
        #[clap(flatten)]
        registry: RegistryArgs,
        /// Register number or name.
        register: String,
        #[arg(allow_hyphen_values = true)]
        value: String,
    }

    pub fn run(args: Args) -> Result<(), Error> {
        runtime()?.block_on(write(args))
    }

    async fn write(args: Args) -> Result<(), Error> {
        let registry = args.registry.load()?;
        let address = resolve(&registry, &args.register)?;
        let kind = registry
            .lookup(address)
            .ok_or(Error::Client(client::Error::UnknownAddress(address)))?
            .kind;
        let value = Value::parse(kind, &args.value).map_err(Error::ParseValue)?;
        let mut client =
            RegisterClient::new(args.connection.transport(), registry, args.connection.unit_id());
        client.connect().await.map_err(Error::Client)?;
        let result = client.write_register(address, &value).await;
        let _ = client.disconnect().await;
        result.map_err(Error::Client)?;
        tracing::info!(message = "written", address, %kind, value = %value);
        Ok(())
    }
}
