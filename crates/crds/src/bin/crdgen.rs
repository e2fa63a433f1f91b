//! Prints the metal CRD manifests as a multi-document YAML stream.

use crds::{Environment, Server, ServerBinding, ServerClass};
use kube::CustomResourceExt;

fn main() -> Result<(), serde_yaml::Error> {
    for crd in [Server::crd(), ServerClass::crd(), ServerBinding::crd(), Environment::crd()] {
        print!("---\n{}", serde_yaml::to_string(&crd)?);
    }
    Ok(())
}
