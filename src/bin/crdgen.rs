use kube::CustomResourceExt;
use searchdb_operator::crd::{SearchCluster, SearchClusterVersion};

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&SearchClusterVersion::crd())?);
    println!("---");
    print!("{}", serde_yaml::to_string(&SearchCluster::crd())?);
    Ok(())
}
