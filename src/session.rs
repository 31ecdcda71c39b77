//! The streaming session with the collector.
//!
//! A session walks through a fixed sequence of states:
//!
//! ```text
//! Uninitialized -> FrequencySet -> PortNegotiated -> Connected
//!     -> MetadataSent -> HeaderSent -> Streaming -> Closed
//! ```
//!
//! Each step is its own method that checks the current state before doing anything,
//! so an out-of-order call is an error rather than a protocol violation on the wire.
//! Control documents are framed as a 4-byte big-endian length followed by JSON.
//! After the header, only raw fixed-length measurement frames are written.

use std::{
    io::Write,
    net::{Shutdown, TcpStream},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    error::{Error, Result},
    exfil::{FrameSender, SendOutcome},
    metadata::{DataHeader, SensorDocument},
    source::SpectrumSource,
};

/// The collector's HTTP control plane listens here unless told otherwise
pub const CONTROL_PORT: u16 = 8000;
pub const STREAMING_PORT_PATH: &str = "/sensordata/getStreamingPort";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    FrequencySet,
    PortNegotiated,
    Connected,
    MetadataSent,
    HeaderSent,
    Streaming,
    Closed,
}

/// Something that can hand out a streaming port for a collector host
pub trait PortNegotiator {
    fn streaming_port(&self, host: &str) -> Result<u16>;
}

#[derive(Debug, Deserialize)]
struct PortReply {
    port: i64,
}

/// Check a control-plane reply body for a usable port
pub fn parse_port_reply(body: &str) -> Result<u16> {
    let reply: PortReply =
        serde_json::from_str(body).map_err(|e| Error::MalformedResponse(e.to_string()))?;
    u16::try_from(reply.port)
        .ok()
        .filter(|&p| p != 0)
        .ok_or_else(|| Error::MalformedResponse(format!("{} is not a valid port", reply.port)))
}

/// Asks the collector's HTTP endpoint for a port with a POST
pub struct HttpNegotiator {
    control_port: u16,
    agent: ureq::Agent,
}

impl HttpNegotiator {
    pub fn new(control_port: u16, timeout: Duration) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        Self {
            control_port,
            agent,
        }
    }

    pub fn url(&self, host: &str) -> String {
        format!("http://{}:{}{}", host, self.control_port, STREAMING_PORT_PATH)
    }
}

impl PortNegotiator for HttpNegotiator {
    fn streaming_port(&self, host: &str) -> Result<u16> {
        let url = self.url(host);
        debug!("POST {}", url);
        let negotiation_failed = |e: ureq::Error| Error::Negotiation {
            host: host.to_owned(),
            reason: e.to_string(),
        };
        let mut response = self
            .agent
            .post(url.as_str())
            .send_empty()
            .map_err(negotiation_failed)?;
        let body = response
            .body_mut()
            .read_to_string()
            .map_err(negotiation_failed)?;
        parse_port_reply(&body)
    }
}

/// Write one length-prefixed JSON document
pub fn write_document<W: Write, T: Serialize>(writer: &mut W, doc: &T) -> Result<()> {
    let bytes = serde_json::to_vec(doc)?;
    let len = u32::try_from(bytes.len())
        .map_err(|_| Error::Config("Control document too large".to_owned()))?;
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}

pub struct StreamSession {
    host: String,
    state: SessionState,
    port: Option<u16>,
    stream: Option<TcpStream>,
    sender: Option<FrameSender>,
    frame_len: usize,
}

impl StreamSession {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            state: SessionState::Uninitialized,
            port: None,
            stream: None,
            sender: None,
            frame_len: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    fn expect_state(&self, expected: SessionState, attempted: &'static str) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(Error::InvalidTransition {
                from: self.state,
                attempted,
            })
        }
    }

    /// Uninitialized -> FrequencySet
    pub fn tune<S: SpectrumSource + ?Sized>(&mut self, source: &mut S, freq: f64) -> Result<()> {
        self.expect_state(SessionState::Uninitialized, "tune")?;
        if !source.tune(freq) {
            return Err(Error::TuneRejected(freq));
        }
        info!("Set frequency to {} MHz", freq / 1e6);
        self.state = SessionState::FrequencySet;
        Ok(())
    }

    /// FrequencySet -> PortNegotiated
    pub fn negotiate<N: PortNegotiator + ?Sized>(&mut self, negotiator: &N) -> Result<u16> {
        self.expect_state(SessionState::FrequencySet, "negotiate a port")?;
        let port = negotiator.streaming_port(&self.host)?;
        info!("Collector assigned streaming port {}", port);
        self.port = Some(port);
        self.state = SessionState::PortNegotiated;
        Ok(port)
    }

    /// PortNegotiated -> Connected
    pub fn connect(&mut self) -> Result<()> {
        self.expect_state(SessionState::PortNegotiated, "connect")?;
        let addr = format!("{}:{}", self.host, self.port.unwrap_or_default());
        let stream = TcpStream::connect(&addr).map_err(|source| Error::Connect {
            addr: addr.clone(),
            source,
        })?;
        stream.set_nodelay(true)?;
        info!("Connected to collector at {}", addr);
        self.stream = Some(stream);
        self.state = SessionState::Connected;
        Ok(())
    }

    fn stream_mut(&mut self) -> Result<&mut TcpStream> {
        let from = self.state;
        self.stream.as_mut().ok_or(Error::InvalidTransition {
            from,
            attempted: "write without a connection",
        })
    }

    /// Connected -> MetadataSent. Sends location then system.
    pub fn send_metadata(&mut self, location: &SensorDocument, system: &SensorDocument) -> Result<()> {
        self.expect_state(SessionState::Connected, "send metadata")?;
        let stream = self.stream_mut()?;
        write_document(stream, location)?;
        write_document(stream, system)?;
        debug!("Sent location and system documents");
        self.state = SessionState::MetadataSent;
        Ok(())
    }

    /// MetadataSent -> HeaderSent
    pub fn send_header(&mut self, header: &DataHeader) -> Result<()> {
        self.expect_state(SessionState::MetadataSent, "send the data header")?;
        write_document(self.stream_mut()?, header)?;
        self.frame_len = header.frame_len();
        debug!("Sent data header, frames will be {} bytes", self.frame_len);
        self.state = SessionState::HeaderSent;
        Ok(())
    }

    /// HeaderSent -> Streaming. Frames are queued to a writer thread holding at most `buffer` of them.
    ///
    /// A write blocked for longer than `timeout` means the collector stopped reading,
    /// and the session treats it as gone.
    pub fn start_streaming(&mut self, buffer: usize, timeout: Duration) -> Result<()> {
        self.expect_state(SessionState::HeaderSent, "start streaming")?;
        let writer = self.stream_mut()?.try_clone()?;
        writer.set_write_timeout(Some(timeout))?;
        self.sender = Some(FrameSender::spawn(writer, buffer)?);
        info!("Streaming to {}", self.host);
        self.state = SessionState::Streaming;
        Ok(())
    }

    /// Queue one measurement frame for the collector
    pub fn send_frame(&mut self, frame: &[i8]) -> Result<SendOutcome> {
        self.expect_state(SessionState::Streaming, "send a frame")?;
        if frame.len() != self.frame_len {
            return Err(Error::LengthMismatch {
                expected: self.frame_len,
                actual: frame.len(),
            });
        }
        match &self.sender {
            Some(sender) => sender.send(frame),
            None => Err(Error::CollectorGone),
        }
    }

    /// Any state -> Closed. Queued frames are flushed before the socket is shut down.
    pub fn close(&mut self) -> Result<()> {
        if self.state == SessionState::Closed {
            return Ok(());
        }
        self.state = SessionState::Closed;
        let drained = match self.sender.take() {
            Some(sender) => sender.finish(),
            None => Ok(()),
        };
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.shutdown(Shutdown::Both) {
                // The peer may already be gone
                warn!("Socket shutdown: {}", e);
            }
            info!("Closed socket");
        }
        drained
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Error closing session: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{io::Read, net::TcpListener, thread, time::Instant};

    use super::*;
    use crate::{metadata::MeasurementParams, source::NoiseSource};

    struct FixedPort(u16);

    impl PortNegotiator for FixedPort {
        fn streaming_port(&self, _host: &str) -> Result<u16> {
            Ok(self.0)
        }
    }

    struct Refuses;

    impl PortNegotiator for Refuses {
        fn streaming_port(&self, host: &str) -> Result<u16> {
            Err(Error::Negotiation {
                host: host.to_owned(),
                reason: "connection refused".to_owned(),
            })
        }
    }

    fn header(n: usize) -> DataHeader {
        DataHeader::new(
            "SIM",
            0,
            MeasurementParams {
                f_start: 0.0,
                f_stop: 1.0,
                n,
                td: -1,
                tm: 0.1,
                det: "Average".to_owned(),
                atten: 0.0,
            },
        )
    }

    fn read_document(stream: &mut TcpStream) -> serde_json::Value {
        let mut len = [0u8; 4];
        stream.read_exact(&mut len).unwrap();
        let mut buf = vec![0u8; u32::from_be_bytes(len) as usize];
        stream.read_exact(&mut buf).unwrap();
        serde_json::from_slice(&buf).unwrap()
    }

    #[test]
    fn test_parse_port_reply() {
        assert_eq!(parse_port_reply(r#"{"port": 9000}"#).unwrap(), 9000);
        assert_eq!(parse_port_reply(r#"{"port": 9000, "extra": 1}"#).unwrap(), 9000);
        for bad in [r#"{}"#, r#"{"port": "9000"}"#, r#"{"port": 70000}"#, r#"{"port": 0}"#, "nope"] {
            assert!(
                matches!(parse_port_reply(bad), Err(Error::MalformedResponse(_))),
                "{}",
                bad
            );
        }
    }

    #[test]
    fn test_write_document_framing() {
        let mut buf = Vec::new();
        write_document(&mut buf, &serde_json::json!({"a": 1})).unwrap();
        assert_eq!(&buf[..4], &[0, 0, 0, 7]);
        assert_eq!(&buf[4..], br#"{"a":1}"#);
    }

    #[test]
    fn test_out_of_order_is_rejected() {
        let mut session = StreamSession::new("127.0.0.1");
        assert!(matches!(
            session.connect(),
            Err(Error::InvalidTransition {
                from: SessionState::Uninitialized,
                ..
            })
        ));
        assert!(session.negotiate(&FixedPort(1)).is_err());
        assert!(session.send_frame(&[0]).is_err());
        assert!(session.send_header(&header(1)).is_err());
        assert_eq!(session.state(), SessionState::Uninitialized);
    }

    #[test]
    fn test_tune_rejected() {
        let mut session = StreamSession::new("127.0.0.1");
        let mut source = NoiseSource::new(8, 1e6, 0);
        assert!(matches!(
            session.tune(&mut source, -5.0),
            Err(Error::TuneRejected(_))
        ));
        assert_eq!(session.state(), SessionState::Uninitialized);
        session.tune(&mut source, 100e6).unwrap();
        assert_eq!(session.state(), SessionState::FrequencySet);
    }

    #[test]
    fn test_negotiation_failure_stays_put() {
        let mut session = StreamSession::new("127.0.0.1");
        session.tune(&mut NoiseSource::new(8, 1e6, 0), 1e6).unwrap();
        assert!(matches!(
            session.negotiate(&Refuses),
            Err(Error::Negotiation { .. })
        ));
        assert_eq!(session.state(), SessionState::FrequencySet);
        assert_eq!(session.port(), None);
    }

    #[test]
    fn test_connect_failure() {
        // Grab a free port and release it so nothing is listening there
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let mut session = StreamSession::new("127.0.0.1");
        session.tune(&mut NoiseSource::new(8, 1e6, 0), 1e6).unwrap();
        session.negotiate(&FixedPort(port)).unwrap();
        assert!(matches!(session.connect(), Err(Error::Connect { .. })));
        assert_eq!(session.state(), SessionState::PortNegotiated);
    }

    #[test]
    fn test_full_sequence() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let collector = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let docs: Vec<_> = (0..3).map(|_| read_document(&mut stream)).collect();
            let mut rest = Vec::new();
            stream.read_to_end(&mut rest).unwrap();
            (docs, rest)
        });

        let mut session = StreamSession::new("127.0.0.1");
        session.tune(&mut NoiseSource::new(8, 1e6, 0), 1e6).unwrap();
        assert_eq!(session.negotiate(&FixedPort(port)).unwrap(), port);
        session.connect().unwrap();
        let loc = SensorDocument::new(Default::default(), 7, "SIM");
        let sys = SensorDocument::new(Default::default(), 7, "SIM");
        session.send_metadata(&loc, &sys).unwrap();
        session.send_header(&header(3)).unwrap();
        session.start_streaming(8, Duration::from_secs(5)).unwrap();
        assert_eq!(session.state(), SessionState::Streaming);
        assert!(matches!(
            session.send_frame(&[1, 2]),
            Err(Error::LengthMismatch {
                expected: 3,
                actual: 2
            })
        ));
        session.send_frame(&[1, -2, 3]).unwrap();
        session.send_frame(&[-128, 0, 127]).unwrap();
        session.close().unwrap();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(session.send_frame(&[0, 0, 0]).is_err());

        let (docs, rest) = collector.join().unwrap();
        assert_eq!(docs[0]["t"], 7);
        assert_eq!(docs[2]["Type"], "Data");
        assert_eq!(docs[2]["n"], 3);
        assert_eq!(rest, vec![1u8, 254, 3, 128, 0, 127]);
    }

    #[test]
    fn test_close_with_stalled_collector() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(1);
        let collector = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            for _ in 0..3 {
                read_document(&mut stream);
            }
            // Keep the connection open but never read another byte
            let _ = done_rx.recv();
            drop(stream);
        });

        let n = 64 * 1024;
        let mut session = StreamSession::new("127.0.0.1");
        session.tune(&mut NoiseSource::new(8, 1e6, 0), 1e6).unwrap();
        session.negotiate(&FixedPort(port)).unwrap();
        session.connect().unwrap();
        let loc = SensorDocument::new(Default::default(), 7, "SIM");
        let sys = SensorDocument::new(Default::default(), 7, "SIM");
        session.send_metadata(&loc, &sys).unwrap();
        session.send_header(&header(n)).unwrap();
        session.start_streaming(4, Duration::from_millis(100)).unwrap();

        // Far more than the socket buffers hold, so the writer ends up blocked
        let frame = vec![0i8; n];
        for _ in 0..1000 {
            match session.send_frame(&frame) {
                Ok(_) => thread::sleep(Duration::from_millis(1)),
                Err(Error::CollectorGone) => break,
                Err(e) => panic!("unexpected error {}", e),
            }
        }

        let start = Instant::now();
        let res = session.close();
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(matches!(res, Ok(()) | Err(Error::CollectorGone)));
        assert_eq!(session.state(), SessionState::Closed);

        done_tx.send(()).unwrap();
        collector.join().unwrap();
    }
}
