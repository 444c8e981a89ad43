//! VM definition construction for one verification attempt.

use crate::artifact::{Artifact, UserData};
use crate::credentials::Credentials;
use crate::error::Result;
use crate::vm::VirtualMachine;
use rand::Rng;

/// Guest account used for in-guest checks.
pub const VERIFY_USERNAME: &str = "verify";

/// Length of the random suffix appended to instance names.
const NAME_SUFFIX_LEN: usize = 5;

/// Alphabet for name suffixes: lowercase consonants and digits, so that
/// suffixes are valid DNS labels and never spell words.
const NAME_ALPHABET: &[u8] = b"bcdfghjklmnpqrstvwxz2456789";

/// Everything needed to create one verification VM.
#[derive(Debug)]
pub struct VmPlan {
    /// Unique instance name.
    pub name: String,
    /// VM definition.
    pub vm: VirtualMachine,
    /// Credentials baked into the VM's guest-init data.
    pub credentials: Credentials,
}

/// Provisions credentials, renders guest-init data and builds the VM for
/// `artifact` booting `image_ref`.
///
/// # Errors
///
/// Returns an error if key generation, rendering or the artifact's VM
/// builder fails. Nothing has been created in the cluster at that point.
pub fn plan_vm(artifact: &dyn Artifact, image_ref: &str, username: &str) -> Result<VmPlan> {
    let credentials = Credentials::generate()?;

    let user_data = artifact.user_data(&UserData {
        username: username.to_string(),
        authorized_keys: vec![credentials.authorized_key().to_string()],
    })?;

    let name = random_name(&artifact.metadata().name);
    let vm = artifact.vm(&name, image_ref, &user_data)?;

    Ok(VmPlan {
        name,
        vm,
        credentials,
    })
}

/// Appends a short random suffix to `base`.
#[must_use]
pub fn random_name(base: &str) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..NAME_SUFFIX_LEN)
        .map(|_| char::from(NAME_ALPHABET[rng.gen_range(0..NAME_ALPHABET.len())]))
        .collect();
    format!("{base}-{suffix}")
}

/// Joins a registry and an image tag the way paths are joined: empty
/// segments are dropped and duplicate slashes collapsed.
#[must_use]
pub fn image_reference(registry: &str, tag: &str) -> String {
    registry
        .split('/')
        .chain(tag.split('/'))
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}
