use asupersync::runtime::RuntimeBuilder;
use asupersync::{Cx, Outcome};

use sqlsession_core::error::{QueryErrorKind, TransactionErrorKind};
use sqlsession_core::{
    CommandOptions, DbConnection, DbTransaction, Error, IsolationLevel, ProviderFactory, Query,
    Row,
};
use sqlsession_sqlite::{SqliteConnection, SqliteProvider};

fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        Outcome::Err(e) => panic!("unexpected error: {e}"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

fn connect(connection_string: &str) -> SqliteConnection {
    let mut conn = SqliteProvider::new()
        .create_connection()
        .expect("sqlite provider always creates a connection");
    conn.set_connection_string(connection_string)
        .expect("set connection string");
    conn
}

async fn count(cx: &Cx, conn: &SqliteConnection) -> i64 {
    let rows: Vec<Row> = unwrap_outcome(
        conn.query(
            cx,
            &Query::new("SELECT COUNT(*) AS n FROM items").unwrap(),
            None,
            &CommandOptions::default(),
        )
        .await,
    );
    rows[0].get_named("n").unwrap()
}

#[test]
fn uncommitted_writes_are_invisible_to_other_connections() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("items.db");
    let path = path.to_str().unwrap();

    rt.block_on(async {
        let writer = connect(path);
        let reader = connect(&format!("path={path}; mode=rw"));
        unwrap_outcome(writer.open(&cx).await);
        writer
            .execute_raw("CREATE TABLE items (id INTEGER PRIMARY KEY, label TEXT NOT NULL)")
            .unwrap();
        unwrap_outcome(reader.open(&cx).await);

        let insert = Query::new("INSERT INTO items (label) VALUES (?)").unwrap();
        let tx = unwrap_outcome(
            writer
                .begin_transaction(&cx, IsolationLevel::ReadCommitted)
                .await,
        );
        assert_eq!(tx.isolation_level(), IsolationLevel::ReadCommitted);
        let affected = unwrap_outcome(
            writer
                .execute(&cx, &insert.bind("first"), Some(&tx), &CommandOptions::default())
                .await,
        );
        assert_eq!(affected, 1);
        assert_eq!(count(&cx, &reader).await, 0);

        unwrap_outcome(tx.commit(&cx).await);
        assert_eq!(count(&cx, &reader).await, 1);

        match tx.rollback(&cx).await {
            Outcome::Err(Error::Transaction(e)) => {
                assert_eq!(e.kind, TransactionErrorKind::NotActive);
            }
            other => panic!("expected not-active error, got {other:?}"),
        }

        writer.close(&cx).await.unwrap();
        reader.close(&cx).await.unwrap();
    });
}

#[test]
fn closed_transaction_is_rolled_back() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("rollback.db");
    let path = path.to_str().unwrap();

    rt.block_on(async {
        let conn = connect(path);
        unwrap_outcome(conn.open(&cx).await);
        conn.execute_raw("CREATE TABLE items (id INTEGER PRIMARY KEY, label TEXT)")
            .unwrap();

        let tx = unwrap_outcome(conn.begin_transaction(&cx, IsolationLevel::Unspecified).await);
        unwrap_outcome(
            conn.execute(
                &cx,
                &Query::new("INSERT INTO items (label) VALUES ('x')").unwrap(),
                Some(&tx),
                &CommandOptions::default(),
            )
            .await,
        );
        tx.close(&cx).await.unwrap();
        tx.close(&cx).await.unwrap();
        assert!(!conn.in_transaction());
        assert_eq!(count(&cx, &conn).await, 0);
        conn.close(&cx).await.unwrap();
    });
}

#[test]
fn exclusive_lock_makes_readers_busy() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("busy.db");
    let path = path.to_str().unwrap();

    rt.block_on(async {
        let owner = connect(path);
        let waiter = connect(&format!("path={path}; busy_timeout=0"));
        unwrap_outcome(owner.open(&cx).await);
        owner
            .execute_raw("CREATE TABLE items (id INTEGER PRIMARY KEY)")
            .unwrap();
        unwrap_outcome(waiter.open(&cx).await);

        let tx = unwrap_outcome(owner.begin_transaction(&cx, IsolationLevel::Serializable).await);
        match waiter
            .query(
                &cx,
                &Query::new("SELECT COUNT(*) FROM items").unwrap(),
                None,
                &CommandOptions::default(),
            )
            .await
        {
            Outcome::Err(Error::Query(e)) => assert_eq!(e.kind, QueryErrorKind::Busy),
            other => panic!("expected busy error, got {other:?}"),
        }

        unwrap_outcome(tx.rollback(&cx).await);
        assert_eq!(count(&cx, &waiter).await, 0);
    });
}

#[test]
fn read_only_mode_rejects_writes() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("ro.db");
    let path = path.to_str().unwrap();

    rt.block_on(async {
        let setup = connect(path);
        unwrap_outcome(setup.open(&cx).await);
        setup
            .execute_raw("CREATE TABLE items (id INTEGER PRIMARY KEY)")
            .unwrap();
        setup.close(&cx).await.unwrap();

        let ro = connect(&format!("path={path}; mode=ro"));
        unwrap_outcome(ro.open(&cx).await);
        assert_eq!(count(&cx, &ro).await, 0);
        let result = ro
            .execute(
                &cx,
                &Query::new("INSERT INTO items DEFAULT VALUES").unwrap(),
                None,
                &CommandOptions::default(),
            )
            .await;
        assert!(matches!(result, Outcome::Err(Error::Query(_))));
    });
}

#[test]
fn missing_file_in_read_write_mode_fails_to_open() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("absent.db");

    rt.block_on(async {
        let conn = connect(&format!("path={}; mode=rw", path.display()));
        match conn.open(&cx).await {
            Outcome::Err(Error::Connection(_)) => {}
            other => panic!("expected connection error, got {other:?}"),
        }
        assert!(!conn.is_open());
    });
}

#[test]
fn cancellation_without_reason_stops_every_entry_point() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let cancelled = Cx::for_testing();
    cancelled.set_cancel_requested(true);
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("cancel.db");
    let path = path.to_str().unwrap();

    rt.block_on(async {
        let conn = connect(path);
        assert!(!matches!(conn.open(&cancelled).await, Outcome::Ok(())));
        assert!(!conn.is_open());

        unwrap_outcome(conn.open(&cx).await);
        conn.execute_raw("CREATE TABLE items (id INTEGER PRIMARY KEY)")
            .unwrap();
        let insert = Query::new("INSERT INTO items DEFAULT VALUES").unwrap();
        let options = CommandOptions::default();

        assert!(!matches!(
            conn.begin_transaction(&cancelled, IsolationLevel::Unspecified)
                .await,
            Outcome::Ok(_)
        ));
        assert!(!conn.in_transaction());
        assert!(!matches!(
            conn.execute(&cancelled, &insert, None, &options).await,
            Outcome::Ok(_)
        ));
        assert!(!matches!(
            conn.query(&cancelled, &insert, None, &options).await,
            Outcome::Ok(_)
        ));
        assert_eq!(count(&cx, &conn).await, 0);

        let tx = unwrap_outcome(conn.begin_transaction(&cx, IsolationLevel::Unspecified).await);
        unwrap_outcome(conn.execute(&cx, &insert, Some(&tx), &options).await);
        assert!(!matches!(tx.commit(&cancelled).await, Outcome::Ok(())));
        assert!(!matches!(tx.rollback(&cancelled).await, Outcome::Ok(())));
        assert!(conn.in_transaction());
        unwrap_outcome(tx.commit(&cx).await);
        assert_eq!(count(&cx, &conn).await, 1);
    });
}
