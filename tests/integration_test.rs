use embeddb::executor::Strategy;
use embeddb::filter::{Expr, Op};
use embeddb::pager::OpenOptions;
use embeddb::sql_value::SqlValue;
use embeddb::Db;

fn temp_db_path(name: &str) -> std::path::PathBuf {
    let mut p = std::env::temp_dir();
    p.push(format!("embeddb-integration-{name}-{}.db", std::process::id()));
    let _ = std::fs::remove_file(&p);
    p
}

#[test]
fn create_insert_and_scan_round_trips_through_a_real_file() {
    let path = temp_db_path("basic");
    let opts = OpenOptions { writable: true, ..Default::default() };
    {
        let mut db = Db::create(path.to_str().unwrap(), &opts).unwrap();
        db.execute_ddl("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT, age INT)").unwrap();
        let mut w = db.writer();
        w.begin_transaction().unwrap();
        w.insert("users", &[SqlValue::Null(), SqlValue::Text("alice".into()), SqlValue::Int(30)]).unwrap();
        w.insert("users", &[SqlValue::Null(), SqlValue::Text("bob".into()), SqlValue::Int(25)]).unwrap();
        w.commit().unwrap();
    }

    let mut db = Db::open(path.to_str().unwrap(), &opts).unwrap();
    let rows = db.scan_all("users").unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].row_id, 1);
    assert_eq!(rows[1].row_id, 2);

    let _ = std::fs::remove_file(&path);
}

#[test]
fn crash_mid_transaction_is_rolled_back_by_journal_replay_on_reopen() {
    let path = temp_db_path("journal");
    let opts = OpenOptions { writable: true, ..Default::default() };
    {
        let mut db = Db::create(path.to_str().unwrap(), &opts).unwrap();
        db.execute_ddl("CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT)").unwrap();
        let mut w = db.writer();
        w.begin_transaction().unwrap();
        w.insert("t", &[SqlValue::Null(), SqlValue::Text("committed".into())]).unwrap();
        w.commit().unwrap();

        // Simulate a crash mid-transaction: begin a second transaction and
        // leave it open (never committed, never rolled back) when the `Db`
        // handle is dropped at the end of this block.
        let mut w2 = db.writer();
        w2.begin_transaction().unwrap();
        w2.insert("t", &[SqlValue::Null(), SqlValue::Text("never_committed".into())]).unwrap();
    }

    let mut db = Db::open(path.to_str().unwrap(), &opts).unwrap();
    let rows = db.scan_all("t").unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].items[1], SqlValue::Text("committed".into()));

    let _ = std::fs::remove_file(&path);
}

#[test]
fn index_on_a_column_is_chosen_over_a_table_scan() {
    let opts = OpenOptions { writable: true, ..Default::default() };
    let mut db = Db::create_in_memory(&opts).unwrap();
    db.execute_ddl("CREATE TABLE orders (id INTEGER PRIMARY KEY, customer_id INT, amount INT)").unwrap();
    db.execute_ddl("CREATE INDEX orders_by_customer ON orders (customer_id)").unwrap();

    let mut w = db.writer();
    w.begin_transaction().unwrap();
    for (customer_id, amount) in [(1, 10), (2, 20), (1, 30), (3, 40), (1, 50)] {
        w.insert("orders", &[SqlValue::Null(), SqlValue::Int(customer_id), SqlValue::Int(amount)]).unwrap();
    }
    w.commit().unwrap();
    drop(w);

    let filter = Expr::cmp("customer_id", Op::Eq, SqlValue::Int(1));
    let mut reader = db.create_reader("orders", None, Some(filter)).unwrap();
    let mut amounts = Vec::new();
    while let Some(row) = reader.read().unwrap() {
        if let SqlValue::Int(a) = &row.items[2] {
            amounts.push(*a);
        }
    }
    amounts.sort();
    assert_eq!(amounts, vec![10, 30, 50]);
    assert_eq!(reader.strategy(), Strategy::SingleIndexSeek);
}

#[test]
fn insert_batch_commits_in_groups_and_survives_reopen() {
    let path = temp_db_path("batch");
    let opts = OpenOptions { writable: true, ..Default::default() };
    {
        let mut db = Db::create(path.to_str().unwrap(), &opts).unwrap();
        db.execute_ddl("CREATE TABLE events (id INTEGER PRIMARY KEY, label TEXT)").unwrap();
        let mut w = db.writer();
        let records: Vec<Vec<SqlValue>> = (0..7)
            .map(|i| vec![SqlValue::Null(), SqlValue::Text(format!("e{i}"))])
            .collect();
        let rowids = w.insert_batch("events", &records, 3).unwrap();
        assert_eq!(rowids.len(), 7);
    }

    let mut db = Db::open(path.to_str().unwrap(), &opts).unwrap();
    let rows = db.scan_all("events").unwrap();
    assert_eq!(rows.len(), 7);

    let _ = std::fs::remove_file(&path);
}

#[test]
fn snapshot_survives_schema_change_on_the_live_db() {
    let opts = OpenOptions { writable: true, ..Default::default() };
    let mut db = Db::create_in_memory(&opts).unwrap();
    db.execute_ddl("CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT)").unwrap();
    {
        let mut w = db.writer();
        w.begin_transaction().unwrap();
        w.insert("t", &[SqlValue::Null(), SqlValue::Text("before".into())]).unwrap();
        w.commit().unwrap();
    }

    let mut snap = embeddb::create_snapshot(&mut db, 64 * 1024 * 1024).unwrap();

    db.execute_ddl("ALTER TABLE t ADD COLUMN extra INT").unwrap();
    {
        let mut w = db.writer();
        w.begin_transaction().unwrap();
        w.insert("t", &[SqlValue::Null(), SqlValue::Text("after".into()), SqlValue::Int(1)]).unwrap();
        w.commit().unwrap();
    }

    let snap_rows = snap.db_mut().scan_all("t").unwrap();
    assert_eq!(snap_rows.len(), 1);
    assert_eq!(snap_rows[0].items.len(), 2);

    let live_rows = db.scan_all("t").unwrap();
    assert_eq!(live_rows.len(), 2);
}

#[test]
fn deleted_rows_are_absent_from_a_subsequent_scan() {
    let opts = OpenOptions { writable: true, ..Default::default() };
    let mut db = Db::create_in_memory(&opts).unwrap();
    db.execute_ddl("CREATE TABLE t (id INTEGER PRIMARY KEY, v INT)").unwrap();
    let mut rowids = Vec::new();
    {
        let mut w = db.writer();
        w.begin_transaction().unwrap();
        for i in 0..5 {
            rowids.push(w.insert("t", &[SqlValue::Null(), SqlValue::Int(i)]).unwrap());
        }
        w.commit().unwrap();
    }
    {
        let mut w = db.writer();
        w.begin_transaction().unwrap();
        assert!(w.delete("t", rowids[1]).unwrap());
        assert!(w.delete("t", rowids[3]).unwrap());
        w.commit().unwrap();
    }
    let rows = db.scan_all("t").unwrap();
    assert_eq!(rows.len(), 3);
    let remaining: Vec<i64> = rows
        .iter()
        .map(|r| match &r.items[1] {
            SqlValue::Int(v) => *v,
            _ => unreachable!(),
        })
        .collect();
    assert_eq!(remaining, vec![0, 2, 4]);
}
