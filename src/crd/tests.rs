//! Unit tests for the SearchCluster resource model
//!
//! Covers decoding of manifests, defaulting, derived names and the phase
//! transition table.

#[cfg(test)]
mod search_cluster_model {
    use kube::CustomResourceExt;

    use crate::crd::{
        DatabasePhase, SearchCluster, SearchClusterSpec, SearchClusterVersion, StandbyMode,
        StorageType, StreamingMode, TerminationPolicy, INITIALIZED_ANNOTATION,
    };
    use crate::testing::sample_cluster;

    fn decode(yaml: &str) -> SearchCluster {
        serde_yaml::from_str(yaml).expect("manifest should decode")
    }

    #[test]
    fn test_minimal_manifest_gets_schema_defaults() {
        let cluster = decode(
            r#"
apiVersion: searchdb.dev/v1alpha1
kind: SearchCluster
metadata:
  name: logs
  namespace: search
spec:
  version: "7.10.2"
"#,
        );

        assert_eq!(cluster.spec.storage_type, Some(StorageType::Durable));
        assert_eq!(cluster.spec.termination_policy, Some(TerminationPolicy::Delete));
        assert_eq!(cluster.spec.replicas, None);
        assert!(!cluster.spec.halted);
    }

    #[test]
    fn test_legacy_mode_spellings_decode() {
        let cluster = decode(
            r#"
apiVersion: searchdb.dev/v1alpha1
kind: SearchCluster
metadata:
  name: logs
spec:
  version: "7.10.2"
  standby: hot
  streaming: asynchronous
"#,
        );

        assert_eq!(cluster.spec.standby, Some(StandbyMode::LegacyHot));
        assert!(cluster.spec.standby.unwrap().is_deprecated());
        assert_eq!(cluster.spec.streaming, Some(StreamingMode::LegacyAsynchronous));
        assert!(!StreamingMode::Synchronous.is_deprecated());
    }

    #[test]
    fn test_unknown_standby_mode_is_refused() {
        let result: Result<SearchCluster, _> = serde_yaml::from_str(
            r#"
apiVersion: searchdb.dev/v1alpha1
kind: SearchCluster
metadata:
  name: logs
spec:
  version: "7.10.2"
  standby: lukewarm
"#,
        );

        assert!(result.is_err());
    }

    #[test]
    fn test_topology_manifest_decodes() {
        let cluster = decode(
            r#"
apiVersion: searchdb.dev/v1alpha1
kind: SearchCluster
metadata:
  name: logs
spec:
  version: "7.10.2"
  topology:
    master:
      replicas: 3
    data:
      prefix: hot
      replicas: 2
      storage:
        size: 10Gi
    client: {}
"#,
        );

        let topology = cluster.spec.topology.unwrap();
        assert_eq!(topology.master.replicas, Some(3));
        assert_eq!(topology.data.prefix.as_deref(), Some("hot"));
        assert_eq!(
            topology.data.storage.unwrap().size.as_deref(),
            Some("10Gi")
        );
        assert_eq!(topology.client.replicas, None);
    }

    #[test]
    fn test_set_defaults_fills_combined_replicas() {
        let mut spec = SearchClusterSpec {
            version: "7.10.2".to_string(),
            ..Default::default()
        };
        spec.set_defaults();

        assert_eq!(spec.replicas, Some(1));
        assert_eq!(spec.storage_type, Some(StorageType::Durable));
        assert_eq!(spec.termination_policy, Some(TerminationPolicy::Delete));
    }

    #[test]
    fn test_set_defaults_keeps_explicit_values() {
        let mut spec = SearchClusterSpec {
            version: "7.10.2".to_string(),
            replicas: Some(5),
            storage_type: Some(StorageType::Ephemeral),
            termination_policy: Some(TerminationPolicy::WipeOut),
            ..Default::default()
        };
        spec.set_defaults();

        assert_eq!(spec.replicas, Some(5));
        assert_eq!(spec.storage_type, Some(StorageType::Ephemeral));
        assert_eq!(spec.termination_policy, Some(TerminationPolicy::WipeOut));
    }

    #[test]
    fn test_derived_names() {
        let cluster = sample_cluster("logs");

        assert_eq!(cluster.key(), "default/logs");
        assert_eq!(cluster.governing_service_name(), "logs-pods");
        assert_eq!(cluster.client_service_name(), "logs");
        assert_eq!(cluster.stats_service_name(), "logs-stats");
        assert_eq!(cluster.config_secret_name(), "logs-config");
        assert_eq!(cluster.generated_auth_secret_name(), "logs-auth");
        assert_eq!(cluster.generated_cert_secret_name(), "logs-cert");
    }

    #[test]
    fn test_initialized_annotation() {
        let mut cluster = sample_cluster("logs");
        assert!(!cluster.is_initialized());

        cluster
            .metadata
            .annotations
            .get_or_insert_with(Default::default)
            .insert(INITIALIZED_ANNOTATION.to_string(), "true".to_string());
        assert!(cluster.is_initialized());
    }

    #[test]
    fn test_initialized_annotation_accepts_any_value() {
        let mut cluster = sample_cluster("logs");
        cluster
            .metadata
            .annotations
            .get_or_insert_with(Default::default)
            .insert(
                INITIALIZED_ANNOTATION.to_string(),
                "2026-10-16T00:00:00Z".to_string(),
            );

        assert!(cluster.is_initialized());
    }

    #[test]
    fn test_phase_transitions() {
        use DatabasePhase::*;

        assert!(DatabasePhase::can_transition(None, Creating));
        assert!(!DatabasePhase::can_transition(None, Running));
        assert!(DatabasePhase::can_transition(Some(Creating), Initializing));
        assert!(DatabasePhase::can_transition(Some(Creating), Running));
        assert!(DatabasePhase::can_transition(Some(Initializing), Running));
        assert!(!DatabasePhase::can_transition(Some(Initializing), Halted));
        assert!(DatabasePhase::can_transition(Some(Running), Halted));
        assert!(DatabasePhase::can_transition(Some(Halted), Running));
        assert!(!DatabasePhase::can_transition(Some(Running), Creating));

        for from in [None, Some(Creating), Some(Running), Some(Halted)] {
            assert!(DatabasePhase::can_transition(from, Terminating));
        }
        assert!(!DatabasePhase::can_transition(Some(Terminating), Running));
    }

    #[test]
    fn test_crds_generate() {
        let cluster_crd = SearchCluster::crd();
        let version_crd = SearchClusterVersion::crd();

        assert_eq!(
            cluster_crd.metadata.name.as_deref(),
            Some("searchclusters.searchdb.dev")
        );
        assert_eq!(cluster_crd.spec.scope, "Namespaced");
        assert_eq!(
            version_crd.metadata.name.as_deref(),
            Some("searchclusterversions.searchdb.dev")
        );
        assert_eq!(version_crd.spec.scope, "Cluster");
    }
}
