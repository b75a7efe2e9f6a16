//! Schema bootstrap against an in-memory cluster

use std::collections::BTreeMap;

use skylift::cluster::ClusterConnector;
use skylift::prelude::*;
use skylift::testing::{MockCluster, RecordedStatement};

async fn session(cluster: &MockCluster) -> Box<dyn ClusterSession> {
    cluster
        .connector()
        .connect(&ClusterConfig::default())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_sync_is_idempotent() {
    let cluster = MockCluster::new();
    let session = session(&cluster).await;
    let table = TableSpec::standard("my_keyspace", "my_table");

    let sync = SchemaSynchronizer::new(session.as_ref());
    sync.sync(&table, &ReplicationSpec::default()).await.unwrap();
    sync.sync(&table, &ReplicationSpec::default()).await.unwrap();

    assert_eq!(cluster.keyspaces(), vec!["my_keyspace".to_string()]);
    assert_eq!(cluster.tables(), vec!["my_keyspace.my_table".to_string()]);
    assert_eq!(cluster.statements().len(), 4);
}

#[tokio::test]
async fn test_network_topology_replication() {
    let cluster = MockCluster::new();
    let session = session(&cluster).await;

    let mut datacenters = BTreeMap::new();
    datacenters.insert("dc1".to_string(), 3);
    let replication = ReplicationSpec::NetworkTopologyStrategy { datacenters };

    SchemaSynchronizer::new(session.as_ref())
        .ensure_keyspace("analytics", &replication)
        .await
        .unwrap();

    match &cluster.statements()[0] {
        RecordedStatement::Ddl(cql) => {
            assert!(cql.contains("'NetworkTopologyStrategy'"));
            assert!(cql.contains("'dc1': 3"));
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn test_table_before_keyspace_fails_with_store_text() {
    let cluster = MockCluster::new();
    let session = session(&cluster).await;
    let table = TableSpec::standard("missing_ks", "t");

    let err = SchemaSynchronizer::new(session.as_ref())
        .ensure_table(&table.qualified_name(), &table.columns)
        .await
        .unwrap_err();

    assert_eq!(err.category(), ErrorCategory::Schema);
    assert!(err
        .to_string()
        .contains("Cannot add table 'missing_ks.t' to non existing keyspace 'missing_ks'"));
}
