use crate::modbus::{ModbusTCPCodec, Operation, Request, Response, ResponseKind};
use futures::{SinkExt as _, StreamExt as _};
use std::time::Duration;
use tokio::io::AsyncWriteExt as _;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_util::codec::Framed;
use tracing::{debug, info, trace, warn};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("lookup of `{1}` failed")]
    LookupHost(#[source] std::io::Error, String),
    #[error("could not connect to `{1}` over TCP")]
    Connect(#[source] std::io::Error, String),
    #[error("could not connect to `{0}` within {1:?}")]
    ConnectTimeout(String, Duration),
    #[error("the transport is not connected")]
    NotConnected,
    #[error("could not send out the request")]
    Send(#[source] std::io::Error),
    #[error("could not send out the request within {0:?}")]
    SendTimeout(Duration),
    #[error("could not read data from the stream")]
    Receive(#[source] std::io::Error),
    #[error("no response received within {0:?}")]
    ReceiveTimeout(Duration),
    #[error("the device closed the connection")]
    Closed,
    #[error("could not shut down the connection")]
    Shutdown(#[source] std::io::Error),
    #[error("the device responded with modbus exception code {0}")]
    Exception(u8),
    #[error("the device responded with {0:?} to a {1:?} request")]
    UnexpectedResponse(ResponseKind, Operation),
}

impl Error {
    /// Whether the session is unusable after this error and has been torn down.
    pub fn is_disconnect(&self) -> bool {
        match self {
            Error::LookupHost(..)
            | Error::Connect(..)
            | Error::ConnectTimeout(..)
            | Error::NotConnected
            | Error::Send(_)
            | Error::SendTimeout(_)
            | Error::Receive(_)
            | Error::ReceiveTimeout(_)
            | Error::Closed
            | Error::Shutdown(_) => true,
            Error::Exception(_) | Error::UnexpectedResponse(..) => false,
        }
    }
}

/// A Modbus capable session moving raw register words to and from one device.
///
/// Addresses are 1-based register numbers. Implementations handle framing and the
/// request/response exchange; they never interpret the words.
#[allow(async_fn_in_trait)]
pub trait Transport {
    /// Open the session. Calling this on an open session does nothing.
    async fn connect(&mut self) -> Result<(), Error>;

    /// Read `count` holding registers starting at `address`.
    ///
    /// Returns the words the device sent, which may be fewer or more than requested. Checking
    /// the length is up to the caller.
    async fn read_words(&mut self, unit_id: u8, address: u16, count: u16)
    -> Result<Vec<u16>, Error>;

    async fn write_words(&mut self, unit_id: u8, address: u16, words: &[u16]) -> Result<(), Error>;

    /// Release the session. Calling this on a closed session does nothing.
    async fn close(&mut self) -> Result<(), Error>;
}

#[derive(clap::Parser, Clone, Debug)]
#[group(id = "connection::Args")]
pub struct Args {
    /// Connect to the device over Modbus TCP, e.g. `192.168.1.20:502`.
    #[arg(long)]
    tcp: String,

    /// The modbus unit (device) ID.
    #[arg(long, short = 'i', default_value = "1")]
    unit_id: u8,

    /// Give up on establishing the TCP connection after this amount of time.
    #[arg(long, default_value = "3s")]
    connect_timeout: humantime::Duration,

    /// Disconnect, if the modbus request can't be sent in this amount of time.
    #[arg(long, default_value = "3s")]
    send_timeout: humantime::Duration,

    /// If the modbus response isn't received in this amount of time, consider the request failed
    /// and disconnect.
    #[arg(long, default_value = "1s")]
    read_timeout: humantime::Duration,
}

impl Args {
    pub fn unit_id(&self) -> u8 {
        self.unit_id
    }

    pub fn transport(&self) -> TcpTransport {
        TcpTransport::new(
            self.tcp.clone(),
            Timeouts {
                connect: *self.connect_timeout,
                send: *self.send_timeout,
                receive: *self.read_timeout,
            },
        )
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Timeouts {
    pub connect: Duration,
    pub send: Duration,
    pub receive: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(3),
            send: Duration::from_secs(3),
            receive: Duration::from_secs(1),
        }
    }
}

type TcpIo = Framed<TcpStream, ModbusTCPCodec>;

/// Modbus TCP session with at most one request in flight.
pub struct TcpTransport {
    address: String,
    timeouts: Timeouts,
    io: Option<TcpIo>,
    next_transaction_id: u16,
}

impl TcpTransport {
    pub fn new(address: String, timeouts: Timeouts) -> Self {
        Self { address, timeouts, io: None, next_transaction_id: 0 }
    }

    pub fn is_connected(&self) -> bool {
        self.io.is_some()
    }

    fn new_transaction_id(&mut self) -> u16 {
        let id = self.next_transaction_id;
        self.next_transaction_id = self.next_transaction_id.wrapping_add(1);
        id
    }

    async fn open(&self) -> Result<TcpIo, Error> {
        let address = &self.address;
        info!(message = "connecting...", address = %address);
        let addresses = tokio::net::lookup_host(address)
            .await
            .map_err(|e| Error::LookupHost(e, address.to_string()))?
            .collect::<Vec<_>>();
        debug!(message = "resolved", ?addresses);
        let socket = TcpStream::connect(&*addresses)
            .await
            .map_err(|e| Error::Connect(e, address.to_string()))?;
        let nodelay_result = socket.set_nodelay(true);
        trace!(message = "setting nodelay", is_error = ?nodelay_result.err());
        info!(message = "connected");
        Ok(Framed::new(socket, ModbusTCPCodec {}))
    }

    async fn exchange(&mut self, unit_id: u8, operation: Operation) -> Result<Response, Error> {
        let request = Request { unit_id, transaction_id: self.new_transaction_id(), operation };
        let result = self.exchange_inner(&request).await;
        if let Err(e) = &result {
            if e.is_disconnect() {
                warn!(
                    message = "request failed, dropping the connection",
                    transaction = request.transaction_id,
                    error = (e as &dyn std::error::Error)
                );
                self.io = None;
            }
        }
        result
    }

    async fn exchange_inner(&mut self, request: &Request) -> Result<Response, Error> {
        let timeouts = self.timeouts;
        let io = self.io.as_mut().ok_or(Error::NotConnected)?;
        tokio::time::timeout(timeouts.send, io.send(request))
            .await
            .map_err(|_| Error::SendTimeout(timeouts.send))?
            .map_err(Error::Send)?;
        let deadline = Instant::now() + timeouts.receive;
        loop {
            let response = tokio::time::timeout_at(deadline, io.next())
                .await
                .map_err(|_| Error::ReceiveTimeout(timeouts.receive))?
                .ok_or(Error::Closed)?
                .map_err(Error::Receive)?;
            trace!(message = "decoded a response", transaction = response.transaction_id);
            if response.transaction_id != request.transaction_id {
                debug!(
                    message = "a response we were not expecting",
                    transaction = response.transaction_id,
                    expected = request.transaction_id
                );
                continue;
            }
            if let Some(code) = response.exception_code() {
                return Err(Error::Exception(code));
            }
            return Ok(response);
        }
    }
}

impl Transport for TcpTransport {
    async fn connect(&mut self) -> Result<(), Error> {
        if self.io.is_some() {
            return Ok(());
        }
        let timeout = self.timeouts.connect;
        let io = tokio::time::timeout(timeout, self.open())
            .await
            .map_err(|_| Error::ConnectTimeout(self.address.clone(), timeout))??;
        self.io = Some(io);
        Ok(())
    }

    async fn read_words(
        &mut self,
        unit_id: u8,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, Error> {
        let operation = Operation::GetHoldings { address, count };
        let response = self.exchange(unit_id, operation.clone()).await?;
        let Some(words) = response.kind.words() else {
            return Err(Error::UnexpectedResponse(response.kind, operation));
        };
        if words.len() != usize::from(count) {
            debug!(message = "word count differs", requested = count, received = words.len());
        }
        Ok(words)
    }

    async fn write_words(&mut self, unit_id: u8, address: u16, words: &[u16]) -> Result<(), Error> {
        let operation = Operation::write(address, words);
        let response = self.exchange(unit_id, operation.clone()).await?;
        match response.kind {
            ResponseKind::SetHolding { .. } | ResponseKind::SetHoldings { .. } => Ok(()),
            kind => Err(Error::UnexpectedResponse(kind, operation)),
        }
    }

    async fn close(&mut self) -> Result<(), Error> {
        let Some(io) = self.io.take() else {
            return Ok(());
        };
        info!(message = "disconnecting", address = %self.address);
        io.into_inner().shutdown().await.map_err(Error::Shutdown)
    }
}
