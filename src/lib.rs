#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

//! Client-side connection, session and result-set layer for the
//! TRMeister/Sydney wire protocol: a small connection pool, a framed
//! object codec, and the `DataSource`/`Session`/`PrepareStatement`/
//! `ResultSet` request builders layered on top of it.

mod control;
mod datasource;
mod error;
mod event;
mod id_allocator;
mod options;
mod pool;
mod port;
mod prepare;
mod protocol;
mod protocol_util;
mod reaper;
mod result_set;
mod session;
mod transport;

pub use crate::datasource::DataSource;
pub use crate::error::{Error, ErrorKind, Result};
pub use crate::event::{
    ControlConnectionSpawnedEvent, PoolEventHandler, PortClosedEvent, PortClosedReason,
    PortOpenedEvent, ReaperTickEvent,
};
pub use crate::options::{DataSourceOptions, Endpoint, Family};
pub use crate::prepare::PrepareStatement;
pub use crate::protocol::{ColumnMetaData, Value};
pub use crate::result_set::ResultSet;
pub use crate::session::Session;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{RequestCode, StatusCode, SLAVE_ID_ANY};
    use crate::transport::{LocalListener, LocalTransport};

    /// A minimal fake server driving the handshake plus whatever requests a
    /// scenario needs, over one accepted [`LocalTransport`] end (`spec.md`
    /// §8's S1-S6, `SPEC_FULL.md` §2's "Local transport paired with a
    /// hand-rolled fake-server harness").
    pub(crate) struct FakeServer {
        channel: crate::protocol::FramedChannel<LocalTransport>,
    }

    impl FakeServer {
        pub(crate) fn new(transport: LocalTransport) -> Self {
            Self {
                channel: crate::protocol::FramedChannel::new(transport),
            }
        }

        /// Reads the raw `(requestedMasterId, requestedSlaveId)` handshake
        /// words without responding, so the caller can choose whether to
        /// agree to what was requested or downgrade it (`spec.md` §8 S6).
        pub(crate) fn handshake(&mut self) -> (i32, i32) {
            let requested_master_id = self.channel.read_integer().unwrap();
            let requested_slave_id = self.channel.read_integer().unwrap();
            (requested_master_id, requested_slave_id)
        }

        pub(crate) fn write_integer(&mut self, value: i32) {
            self.channel.write_integer(value).unwrap();
        }

        pub(crate) fn read_integer(&mut self) -> i32 {
            self.channel.read_integer().unwrap()
        }

        pub(crate) fn read_request(&mut self) -> i32 {
            self.channel
                .read_object()
                .unwrap()
                .unwrap()
                .into_integer()
                .unwrap()
        }

        pub(crate) fn read_value(&mut self) -> Value {
            self.channel.read_object().unwrap().unwrap()
        }

        pub(crate) fn write_value(&mut self, value: Value) {
            self.channel.write_object(&value).unwrap();
        }

        pub(crate) fn write_status(&mut self) {
            self.channel
                .write_object(&Value::Status(StatusCode::Success))
                .unwrap();
        }
    }

    #[test]
    fn master_id_round_trips_through_its_bit_layout() {
        let id = crate::protocol::MasterId {
            protocol_version: 5,
            crypto_algorithm: 0,
            authorization_mode: crate::protocol::AuthorizationMode::Password,
        };
        let decoded = crate::protocol::MasterId::decode(id.encode());
        assert_eq!(decoded, id);
    }

    #[test]
    fn local_transport_round_trips_a_framed_value() {
        let (client, server) = LocalTransport::pair();
        let mut client_channel = crate::protocol::FramedChannel::new(client);
        let mut server_channel = crate::protocol::FramedChannel::new(server);

        client_channel
            .write_object(&Value::String("hello".to_string()))
            .unwrap();
        client_channel.flush().unwrap();

        let got = server_channel.read_object().unwrap().unwrap();
        assert_eq!(got, Value::String("hello".to_string()));
    }

    /// S1 (`spec.md` §8): one session, one statement, one row. Drives a
    /// `DataSource` end to end over an in-process listener: the control
    /// connection's handshake and `BeginConnection`, a `BeginWorker` that
    /// opens a fresh worker `Port` for `createSession`, that `Port` coming
    /// back out of the pool and being confirmed for reuse (the `sync` frame)
    /// for `executeStatement`, and the exact frame order the scenario names.
    #[test]
    fn s1_simple_query_one_row_drains_and_repools_its_port() {
        let (listener, acceptor) = LocalListener::bind();

        let server = std::thread::spawn(move || {
            let mut control = FakeServer::new(acceptor.accept());
            let (master_word, _slave) = control.handshake();
            control.write_integer(master_word);
            control.write_integer(1);

            assert_eq!(control.read_request(), RequestCode::BeginConnection as i32);
            let _hostname = control.read_value();
            control.write_status();

            assert_eq!(control.read_request(), RequestCode::BeginWorker as i32);
            assert_eq!(control.read_value().into_integer().unwrap(), SLAVE_ID_ANY);
            control.write_value(Value::Integer(2));
            control.write_value(Value::Integer(100));
            control.write_status();

            let mut worker = FakeServer::new(acceptor.accept());
            let (worker_master_word, _requested_slave) = worker.handshake();
            worker.write_integer(worker_master_word);
            worker.write_integer(2);

            assert_eq!(worker.read_request(), RequestCode::BeginSession as i32);
            let _database_name = worker.read_value();
            worker.write_value(Value::Integer(555));
            worker.write_status();

            assert_eq!(control.read_request(), RequestCode::BeginWorker as i32);
            assert_eq!(control.read_value().into_integer().unwrap(), 2);
            control.write_value(Value::Integer(2));
            control.write_value(Value::Integer(101));
            control.write_status();

            let echoed_slave_id = worker.read_integer();
            worker.write_integer(echoed_slave_id);

            assert_eq!(worker.read_request(), RequestCode::ExecuteStatement as i32);
            let _session_id = worker.read_value();
            let _sql = worker.read_value();
            let _params = worker.read_value();

            worker.write_value(Value::ResultSetMetaData(vec![crate::protocol::ColumnMetaData {
                name: "1".to_string(),
                type_class_id: 0,
            }]));
            worker.write_value(Value::DataArray(vec![Value::Integer(1)]));
            worker.write_status();

            control
        });

        let data_source = crate::DataSource::open(
            crate::Endpoint::LocalListener(std::sync::Arc::new(listener)),
            5,
            crate::DataSourceOptions::builder().build(),
        )
        .unwrap();

        let session = data_source.create_session("db1", None).unwrap();
        assert!(session.is_valid());

        let mut rows = session.execute_statement("SELECT 1", &[]).unwrap();
        assert_eq!(
            rows.metadata().map(|cols| cols.len()),
            None,
            "metadata isn't populated until the first frame is read"
        );

        let first = rows.next_tuple().unwrap();
        assert_eq!(first, Some(vec![Value::Integer(1)]));
        assert_eq!(rows.metadata().unwrap()[0].name, "1");

        let second = rows.next_tuple().unwrap();
        assert_eq!(second, None);
        assert!(rows.is_done());

        assert_eq!(data_source.idle_pool_count(), 1);

        server.join().unwrap();
    }

    /// `close()` tolerates being called more than once (`spec.md` §4.5):
    /// the second call must see `open_state.counter == 0` and return
    /// immediately rather than issuing a second `EndConnection`.
    #[test]
    fn close_is_idempotent() {
        let (listener, acceptor) = LocalListener::bind();

        let server = std::thread::spawn(move || {
            let mut control = FakeServer::new(acceptor.accept());
            let (master_word, _slave) = control.handshake();
            control.write_integer(master_word);
            control.write_integer(1);

            assert_eq!(control.read_request(), RequestCode::BeginConnection as i32);
            let _hostname = control.read_value();
            control.write_status();

            assert_eq!(control.read_request(), RequestCode::EndConnection as i32);
            control.write_status();
        });

        let data_source = crate::DataSource::open(
            crate::Endpoint::LocalListener(std::sync::Arc::new(listener)),
            5,
            crate::DataSourceOptions::builder().build(),
        )
        .unwrap();

        data_source.close();
        data_source.close();

        server.join().unwrap();
    }
}
