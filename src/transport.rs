//! One request/response exchange per connection.
use crate::{
    client::ConnectionParameters,
    frame::{announced_frame_len, MAX_FRAME_LEN},
    Error, Result,
};
use log::*;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

/// Carries exactly one request to the logger and returns its raw response.
///
/// Implementations hold no connection between calls and never retry.
pub trait Transport {
    fn exchange(&mut self, params: &ConnectionParameters, request: &[u8]) -> Result<Vec<u8>>;
}

/// Opens a fresh TCP connection for every exchange.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpTransport;

impl TcpTransport {
    fn connect(params: &ConnectionParameters) -> Result<TcpStream> {
        let address = format!("{}:{}", params.host(), params.port());
        let connect_error = |source: io::Error| Error::Connect {
            address: address.clone(),
            source,
        };

        let candidates: Vec<SocketAddr> = (params.host(), params.port())
            .to_socket_addrs()
            .map_err(connect_error)?
            .collect();

        let mut last_error =
            io::Error::new(io::ErrorKind::NotFound, "host resolved to no address");
        for socket_addr in candidates {
            match TcpStream::connect_timeout(&socket_addr, params.timeout()) {
                Ok(stream) => {
                    stream
                        .set_read_timeout(Some(params.timeout()))
                        .map_err(connect_error)?;
                    stream
                        .set_write_timeout(Some(params.timeout()))
                        .map_err(connect_error)?;
                    debug!("Connected to {socket_addr}");
                    return Ok(stream);
                }
                Err(error) => {
                    debug!("Connect to {socket_addr} failed: {error}");
                    last_error = error;
                }
            }
        }
        Err(connect_error(last_error))
    }

    /// Reads until the frame announced by the header is complete, the peer
    /// closes, [`MAX_FRAME_LEN`] bytes have arrived or `timeout` has elapsed
    /// since the first read.
    fn receive(stream: &mut TcpStream, timeout: Duration) -> Result<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        let mut buf = vec![0; MAX_FRAME_LEN];
        let mut received = 0;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                if received == 0 {
                    return Err(Error::Recv(io::ErrorKind::TimedOut.into()));
                }
                debug!("Receive deadline passed after {received} bytes");
                break;
            }
            stream
                .set_read_timeout(Some(remaining))
                .map_err(Error::Recv)?;

            let n = match stream.read(&mut buf[received..]) {
                Ok(n) => n,
                Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                Err(error) if received > 0 => {
                    debug!("Read stopped after {received} bytes: {error}");
                    break;
                }
                Err(error) => return Err(Error::Recv(error)),
            };
            if n == 0 {
                if received == 0 {
                    return Err(Error::Recv(io::ErrorKind::UnexpectedEof.into()));
                }
                break;
            }
            received += n;
            let complete = announced_frame_len(&buf[..received])
                .is_some_and(|frame_len| received >= frame_len);
            if complete || received == buf.len() {
                break;
            }
        }
        buf.truncate(received);
        Ok(buf)
    }
}

impl Transport for TcpTransport {
    fn exchange(&mut self, params: &ConnectionParameters, request: &[u8]) -> Result<Vec<u8>> {
        let mut stream = Self::connect(params)?;
        trace!("Sending {request:02X?}");

        let result = stream
            .write_all(request)
            .and_then(|_| stream.flush())
            .map_err(Error::Send)
            .and_then(|_| Self::receive(&mut stream, params.timeout()));

        let _ = stream.shutdown(Shutdown::Both);
        drop(stream);

        let response = result?;
        trace!("Received {response:02X?}");
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::UnitId;
    use crate::frame::encode_response;
    use assert_matches::assert_matches;
    use std::net::TcpListener;
    use std::thread;

    fn params_for(listener: &TcpListener) -> ConnectionParameters {
        let port = listener.local_addr().unwrap().port();
        ConnectionParameters::new("127.0.0.1", port, UnitId::default())
            .unwrap()
            .with_timeout(Duration::from_millis(500))
            .unwrap()
    }

    #[test]
    fn exchange_reassembles_split_response() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let params = params_for(&listener);
        let response = encode_response(1, 1, &[1, 2, 3, 4]);
        let expected = response.clone();

        let peer = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = [0; 12];
            stream.read_exact(&mut request).unwrap();
            stream.write_all(&response[..5]).unwrap();
            stream.flush().unwrap();
            thread::sleep(Duration::from_millis(20));
            stream.write_all(&response[5..]).unwrap();
            request
        });

        let received = TcpTransport.exchange(&params, &[0xAB; 12]).unwrap();
        assert_eq!(received, expected);
        assert_eq!(peer.join().unwrap(), [0xAB; 12]);
    }

    #[test]
    fn trickling_peer_is_bounded_by_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let params = ConnectionParameters::new("127.0.0.1", port, UnitId::default())
            .unwrap()
            .with_timeout(Duration::from_millis(200))
            .unwrap();
        let response = encode_response(1, 1, &[0; 20]);
        let frame_len = response.len();

        let peer = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = [0; 12];
            stream.read_exact(&mut request).unwrap();
            for byte in response {
                if stream.write_all(&[byte]).is_err() {
                    break;
                }
                thread::sleep(Duration::from_millis(150));
            }
        });

        let started = Instant::now();
        let received = TcpTransport.exchange(&params, &[0; 12]).unwrap();
        let elapsed = started.elapsed();
        assert!(elapsed < Duration::from_secs(1), "elapsed {elapsed:?}");
        assert!(!received.is_empty());
        assert!(received.len() < frame_len);
        peer.join().unwrap();
    }

    #[test]
    fn peer_closing_without_data_is_recv_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let params = params_for(&listener);
        let peer = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = [0; 12];
            stream.read_exact(&mut request).unwrap();
        });

        assert_matches!(
            TcpTransport.exchange(&params, &[0; 12]),
            Err(Error::Recv(_))
        );
        peer.join().unwrap();
    }

    #[test]
    fn silent_peer_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let params = params_for(&listener);
        let peer = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            thread::sleep(Duration::from_millis(1000));
            drop(stream);
        });

        assert_matches!(
            TcpTransport.exchange(&params, &[0; 12]),
            Err(Error::Recv(_))
        );
        peer.join().unwrap();
    }

    #[test]
    fn refused_connection_is_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let params = params_for(&listener);
        drop(listener);

        assert_matches!(
            TcpTransport.exchange(&params, &[0; 12]),
            Err(Error::Connect { .. })
        );
    }
}
