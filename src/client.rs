use crate::connection::{self, Transport};
use crate::marshal;
use crate::registry::Registry;
use crate::value::{Kind, RegisterValue, Value};
use tracing::{debug, warn};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("register {0} is not in the register table")]
    UnknownAddress(u16),
    #[error("the client is not connected")]
    NotConnected,
    #[error("transport failure while accessing register {1}")]
    Transport(#[source] connection::Error, u16),
    #[error("could not connect")]
    Connect(#[source] connection::Error),
    #[error("could not release the connection")]
    Disconnect(#[source] connection::Error),
    #[error("could not convert the contents of register {1}")]
    Marshal(#[source] marshal::Error, u16),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Disconnected,
    Connecting,
    Connected,
}

/// Typed register access to a single device.
///
/// Every operation takes `&mut self`, so a client can only ever have one request in flight.
/// Use one client per device to talk to several devices at once; the registry can be shared
/// between them (e.g. behind an `Arc`).
///
/// Dropping the client drops the transport, which releases the underlying session.
pub struct RegisterClient<T, R> {
    transport: T,
    registry: R,
    unit_id: u8,
    state: State,
}

impl<T: Transport, R: Registry> RegisterClient<T, R> {
    pub fn new(transport: T, registry: R, unit_id: u8) -> Self {
        Self { transport, registry, unit_id, state: State::Disconnected }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub async fn connect(&mut self) -> Result<(), Error> {
        if self.state == State::Connected {
            return Ok(());
        }
        self.state = State::Connecting;
        match self.transport.connect().await {
            Ok(()) => {
                self.state = State::Connected;
                Ok(())
            }
            Err(e) => {
                self.state = State::Disconnected;
                Err(Error::Connect(e))
            }
        }
    }

    /// Release the transport. Does nothing if already disconnected.
    pub async fn disconnect(&mut self) -> Result<(), Error> {
        if self.state == State::Disconnected {
            return Ok(());
        }
        self.state = State::Disconnected;
        self.transport.close().await.map_err(Error::Disconnect)
    }

    /// Read the register at `address`, interpreting its words as `kind`.
    pub async fn read_register(
        &mut self,
        address: u16,
        kind: Kind,
    ) -> Result<RegisterValue, Error> {
        if self.state != State::Connected {
            return Err(Error::NotConnected);
        }
        let info = self.registry.lookup(address).ok_or(Error::UnknownAddress(address))?;
        if info.kind != kind {
            debug!(
                message = "reading with a kind other than documented",
                address,
                %kind,
                documented = %info.kind
            );
        }
        let (name, description) = (info.name.to_string(), info.description.to_string());
        let words = match self.transport.read_words(self.unit_id, address, kind.words()).await {
            Ok(words) => words,
            Err(e) => return Err(self.transport_failed(e, address).await),
        };
        let value = marshal::decode(kind, &words).map_err(|e| Error::Marshal(e, address))?;
        Ok(RegisterValue::new(address, name, description, value))
    }

    /// Read the register at `address` using the kind the registry documents for it.
    pub async fn read(&mut self, address: u16) -> Result<RegisterValue, Error> {
        if self.state != State::Connected {
            return Err(Error::NotConnected);
        }
        let kind = self.registry.lookup(address).ok_or(Error::UnknownAddress(address))?.kind;
        self.read_register(address, kind).await
    }

    /// Write `value` to the register at `address`.
    ///
    /// The value must be of the kind the registry documents for the address. Nothing is read
    /// back; the transport reports whether the device accepted the write.
    pub async fn write_register(&mut self, address: u16, value: &Value) -> Result<(), Error> {
        if self.state != State::Connected {
            return Err(Error::NotConnected);
        }
        let info = self.registry.lookup(address).ok_or(Error::UnknownAddress(address))?;
        let words = marshal::encode_as(info.kind, value).map_err(|e| Error::Marshal(e, address))?;
        if let Err(e) = self.transport.write_words(self.unit_id, address, &words).await {
            return Err(self.transport_failed(e, address).await);
        }
        Ok(())
    }

    async fn transport_failed(&mut self, error: connection::Error, address: u16) -> Error {
        if error.is_disconnect() {
            self.state = State::Disconnected;
            if let Err(e) = self.transport.close().await {
                warn!(
                    message = "could not release the transport",
                    error = (&e as &dyn std::error::Error)
                );
            }
        }
        Error::Transport(error, address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::TableRegistry;
    use std::collections::VecDeque;
    use std::time::Duration;

    #[derive(Debug, PartialEq)]
    enum Call {
        Read(u8, u16, u16),
        Write(u8, u16, Vec<u16>),
    }

    #[derive(Default)]
    struct FakeTransport {
        responses: VecDeque<Result<Vec<u16>, connection::Error>>,
        calls: Vec<Call>,
        connects: usize,
        closes: usize,
        refuse_connect: bool,
    }

    impl FakeTransport {
        fn answering(responses: Vec<Result<Vec<u16>, connection::Error>>) -> Self {
            Self { responses: responses.into(), ..Default::default() }
        }
    }

    impl Transport for FakeTransport {
        async fn connect(&mut self) -> Result<(), connection::Error> {
            self.connects += 1;
            if self.refuse_connect {
                return Err(connection::Error::ConnectTimeout(
                    "fake".into(),
                    Duration::from_secs(1),
                ));
            }
            Ok(())
        }

        async fn read_words(
            &mut self,
            unit_id: u8,
            address: u16,
            count: u16,
        ) -> Result<Vec<u16>, connection::Error> {
            self.calls.push(Call::Read(unit_id, address, count));
            self.responses.pop_front().unwrap_or(Err(connection::Error::Closed))
        }

        async fn write_words(
            &mut self,
            unit_id: u8,
            address: u16,
            words: &[u16],
        ) -> Result<(), connection::Error> {
            self.calls.push(Call::Write(unit_id, address, words.to_vec()));
            self.responses.pop_front().unwrap_or(Ok(Vec::new())).map(drop)
        }

        async fn close(&mut self) -> Result<(), connection::Error> {
            self.closes += 1;
            Ok(())
        }
    }

    fn registry() -> TableRegistry {
        TableRegistry::from_json(
            r#"[
                {"address": 40083, "name": "Power", "description": "AC Power", "kind": "float32"},
                {"address": 40200, "name": "Cycles", "description": "Battery cycles", "kind": "acc32"},
                {"address": 40300, "name": "Model", "description": "Model name", "kind": "string16"}
            ]"#,
        )
        .unwrap()
    }

    async fn connected(
        transport: FakeTransport,
    ) -> RegisterClient<FakeTransport, TableRegistry> {
        let mut client = RegisterClient::new(transport, registry(), 1);
        client.connect().await.unwrap();
        client
    }

    #[tokio::test]
    async fn reads_float_power() {
        let mut client = connected(FakeTransport::answering(vec![Ok(vec![0x0000, 0x42F6])])).await;
        let value = client.read_register(40083, Kind::Float32).await.unwrap();
        assert_eq!(value.value(), &Value::Float32(123.0));
        assert_eq!(value.name(), "Power");
        assert_eq!(value.description(), "AC Power");
        assert_eq!(value.address(), 40083);
        assert_eq!(value.to_string(), "123");
        assert_eq!(client.transport().calls, [Call::Read(1, 40083, 2)]);
    }

    #[tokio::test]
    async fn read_uses_documented_kind() {
        let mut client = connected(FakeTransport::answering(vec![Ok(vec![0x0001, 0x0002])])).await;
        let value = client.read(40200).await.unwrap();
        assert_eq!(value.value(), &Value::Acc32(0x0002_0001));
        assert_eq!(client.transport().calls, [Call::Read(1, 40200, 2)]);
    }

    #[tokio::test]
    async fn kind_override() {
        let mut client = connected(FakeTransport::answering(vec![Ok(vec![0x0001, 0x0002])])).await;
        let value = client.read_register(40200, Kind::Uint32).await.unwrap();
        assert_eq!(value.value(), &Value::Uint32(0x0001_0002));
        assert_eq!(value.kind(), Kind::Uint32);
    }

    #[tokio::test]
    async fn reads_text_with_padding() {
        let words = vec![0x4142, 0x4300, 0, 0, 0, 0, 0, 0];
        let mut client = connected(FakeTransport::answering(vec![Ok(words)])).await;
        let value = client.read(40300).await.unwrap();
        assert_eq!(value.value().as_str().unwrap(), "ABC\0\0\0\0\0\0\0\0\0\0\0\0\0");
        assert_eq!(client.transport().calls, [Call::Read(1, 40300, 8)]);
    }

    #[tokio::test]
    async fn unknown_address_skips_the_transport() {
        let mut client = connected(FakeTransport::default()).await;
        let error = client.read_register(40001, Kind::Uint16).await.unwrap_err();
        assert!(matches!(error, Error::UnknownAddress(40001)));
        let error = client.write_register(40001, &Value::Uint16(1)).await.unwrap_err();
        assert!(matches!(error, Error::UnknownAddress(40001)));
        assert!(client.transport().calls.is_empty());
        assert_eq!(client.state(), State::Connected);
    }

    #[tokio::test]
    async fn disconnected_client_skips_the_transport() {
        let mut client = RegisterClient::new(FakeTransport::default(), registry(), 1);
        assert_eq!(client.state(), State::Disconnected);
        assert!(matches!(
            client.read_register(40083, Kind::Float32).await,
            Err(Error::NotConnected)
        ));
        assert!(matches!(client.read(40083).await, Err(Error::NotConnected)));
        assert!(matches!(
            client.write_register(40083, &Value::Float32(1.0)).await,
            Err(Error::NotConnected)
        ));
        assert!(client.transport().calls.is_empty());
        assert_eq!(client.transport().connects, 0);
    }

    #[tokio::test]
    async fn connect_is_idempotent() {
        let mut client = connected(FakeTransport::default()).await;
        client.connect().await.unwrap();
        assert_eq!(client.transport().connects, 1);
        assert_eq!(client.state(), State::Connected);
    }

    #[tokio::test]
    async fn failed_connect_stays_disconnected() {
        let transport = FakeTransport { refuse_connect: true, ..Default::default() };
        let mut client = RegisterClient::new(transport, registry(), 1);
        assert!(matches!(client.connect().await, Err(Error::Connect(_))));
        assert_eq!(client.state(), State::Disconnected);
    }

    #[tokio::test]
    async fn timeout_disconnects() {
        let timeout = connection::Error::ReceiveTimeout(Duration::from_secs(1));
        let mut client = connected(FakeTransport::answering(vec![Err(timeout)])).await;
        let error = client.read_register(40083, Kind::Float32).await.unwrap_err();
        assert!(matches!(
            error,
            Error::Transport(connection::Error::ReceiveTimeout(_), 40083)
        ));
        assert_eq!(client.state(), State::Disconnected);
        assert_eq!(client.transport().closes, 1);
        assert!(matches!(client.read(40083).await, Err(Error::NotConnected)));
        client.disconnect().await.unwrap();
        assert_eq!(client.transport().closes, 1);
        assert_eq!(client.transport().calls.len(), 1);
    }

    #[tokio::test]
    async fn device_exception_keeps_connection() {
        let exception = connection::Error::Exception(2);
        let mut client = connected(FakeTransport::answering(vec![Err(exception)])).await;
        let error = client.read(40083).await.unwrap_err();
        assert!(matches!(error, Error::Transport(connection::Error::Exception(2), 40083)));
        assert_eq!(client.state(), State::Connected);
        assert_eq!(client.transport().closes, 0);
    }

    #[tokio::test]
    async fn wrong_word_count_is_a_marshaling_error() {
        let mut client = connected(FakeTransport::answering(vec![Ok(vec![0x42F6])])).await;
        let error = client.read(40083).await.unwrap_err();
        assert!(matches!(
            error,
            Error::Marshal(
                marshal::Error::LengthMismatch { kind: Kind::Float32, expected: 2, actual: 1 },
                40083
            )
        ));
        assert_eq!(client.state(), State::Connected);
    }

    #[tokio::test]
    async fn writes_encoded_words() {
        let mut client = connected(FakeTransport::default()).await;
        client.write_register(40083, &Value::Float32(123.0)).await.unwrap();
        client.write_register(40200, &Value::Acc32(0x0002_0001)).await.unwrap();
        assert_eq!(
            client.transport().calls,
            [
                Call::Write(1, 40083, vec![0x0000, 0x42F6]),
                Call::Write(1, 40200, vec![0x0001, 0x0002]),
            ]
        );
    }

    #[tokio::test]
    async fn write_checks_documented_kind() {
        let mut client = connected(FakeTransport::default()).await;
        let error = client.write_register(40083, &Value::Uint32(1)).await.unwrap_err();
        assert!(matches!(
            error,
            Error::Marshal(marshal::Error::KindMismatch(Kind::Uint32, Kind::Float32), 40083)
        ));
        assert!(client.transport().calls.is_empty());
    }

    #[tokio::test]
    async fn disconnect_releases_once() {
        let mut client = connected(FakeTransport::default()).await;
        client.disconnect().await.unwrap();
        client.disconnect().await.unwrap();
        assert_eq!(client.transport().closes, 1);
        assert_eq!(client.state(), State::Disconnected);
        client.connect().await.unwrap();
        assert_eq!(client.state(), State::Connected);
        assert_eq!(client.transport().connects, 2);
    }
}
