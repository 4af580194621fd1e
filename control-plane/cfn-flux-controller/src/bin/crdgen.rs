use cfn_flux_controller::crd::CloudFormationStack;
use kube::core::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let crd = CloudFormationStack::crd();
    let yaml = serde_yaml::to_string(&crd)?;
    println!("{}", yaml);
    Ok(())
}
