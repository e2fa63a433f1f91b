//! iPXE scripts and binary patching.
//!
//! The iPXE binaries shipped in the data directory embed a whitespace
//! padded script region between two sentinel lines. At startup the region is
//! overwritten with [`render_embedded_script`] so that every machine booting
//! them chains straight to this server.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::info;

/// Kernel file name inside an environment directory.
pub const KERNEL_ASSET: &str = "vmlinuz";

/// Initrd file name inside an environment directory.
pub const INITRD_ASSET: &str = "initramfs.xz";

const PLACEHOLDER_START: &[u8] = b"# *PLACEHOLDER START*";
const PLACEHOLDER_END: &[u8] = b"# *PLACEHOLDER END*";

/// Default location of the `zbin` compressor built alongside iPXE.
pub const DEFAULT_ZBIN: &str = "/bin/zbin";

/// Answer to `/ipxe` when the server should boot its local disk via `exit`.
pub const BOOT_FROM_DISK_EXIT: &str = "#!ipxe\nexit\n";

/// Answer to `/ipxe` when the server should boot its local disk via `sanboot`.
pub const BOOT_FROM_DISK_SANBOOT: &str = "#!ipxe\nsanboot --no-describe --drive 0x80\n";

#[derive(Debug, Error)]
pub enum PatchError {
    #[error("placeholder start not found in {0:?}")]
    MissingStart(PathBuf),

    #[error("placeholder end not found in {0:?}")]
    MissingEnd(PathBuf),

    #[error("placeholder end before start in {0:?}")]
    MarkersOutOfOrder(PathBuf),

    #[error("script size {script} is larger than placeholder space {placeholder}")]
    ScriptTooLarge { script: usize, placeholder: usize },

    #[error("failed to compress {path:?}: {reason}")]
    Compress { path: PathBuf, reason: String },

    #[error("IO error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> PatchError + '_ {
    move |source| PatchError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Script embedded into the iPXE binaries.
///
/// Tries DHCP on every interface in turn and chains to `/ipxe` on the first
/// one that works. Ten full passes are made before the machine reboots.
#[must_use]
pub fn render_embedded_script(endpoint: &str, port: u16) -> String {
    format!(
        r#"#!ipxe
prompt --key 0x02 --timeout 2000 Press Ctrl-B for the iPXE command line... && shell ||

# print interfaces
ifstat

# retry 10 times overall
set attempts:int32 10
set x:int32 0

:retry_loop

	set idx:int32 0

	:loop
		# try DHCP on each interface
		isset ${{net${{idx}}/mac}} || goto exhausted

		ifclose
		iflinkwait --timeout 5000 net${{idx}} || goto next_iface
		dhcp net${{idx}} && goto boot

	:next_iface
		inc idx && goto loop

	:boot
		# attempt boot, if fails try next iface
		route

		chain --replace http://{endpoint}:{port}/ipxe?uuid=${{uuid}}&mac=${{net${{idx}}/mac:hexhyp}}&domain=${{domain}}&hostname=${{hostname}}&serial=${{serial}}&arch=${{buildarch}} || goto next_iface

:exhausted
	echo
	echo Failed to iPXE boot successfully via all interfaces

	iseq ${{x}} ${{attempts}} && goto fail ||

	echo Retrying...
	echo

	inc x
	goto retry_loop

:fail
	echo
	echo Failed to get a valid response after ${{attempts}} attempts
	echo

	echo Rebooting in 5 seconds...
	sleep 5
	reboot
"#
    )
}

/// Script chaining a machine into an environment's kernel and initrd.
#[must_use]
pub fn render_environment_script(env_name: &str, kernel_args: &[String]) -> String {
    let mut kernel = format!("kernel /env/{env_name}/{KERNEL_ASSET}");
    for arg in kernel_args {
        kernel.push(' ');
        kernel.push_str(arg);
    }

    format!("#!ipxe\n{kernel}\ninitrd /env/{env_name}/{INITRD_ASSET}\nboot\n")
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Overwrites the placeholder region of `contents` with `script`, padded
/// with newlines to the exact size of the region.
pub fn patch_script(contents: &mut [u8], script: &[u8], source: &Path) -> Result<(), PatchError> {
    let start = find(contents, PLACEHOLDER_START).ok_or_else(|| PatchError::MissingStart(source.to_path_buf()))?;
    let end = find(contents, PLACEHOLDER_END).ok_or_else(|| PatchError::MissingEnd(source.to_path_buf()))?;

    if end < start {
        return Err(PatchError::MarkersOutOfOrder(source.to_path_buf()));
    }

    let end = end + PLACEHOLDER_END.len();
    let placeholder = end - start;

    if script.len() > placeholder {
        return Err(PatchError::ScriptTooLarge {
            script: script.len(),
            placeholder,
        });
    }

    let region = &mut contents[start..end];
    region[..script.len()].copy_from_slice(script);
    region[script.len()..].fill(b'\n');

    Ok(())
}

/// Patches `source` into `destination`, creating parent directories.
pub async fn patch_file(source: &Path, destination: &Path, script: &[u8]) -> Result<(), PatchError> {
    let mut contents = tokio::fs::read(source).await.map_err(io_err(source))?;
    patch_script(&mut contents, script, source)?;

    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(io_err(parent))?;
    }
    tokio::fs::write(destination, contents).await.map_err(io_err(destination))?;

    Ok(())
}

/// Layout of the iPXE binaries and the TFTP directory they are patched into.
#[derive(Debug, Clone)]
pub struct IpxePatcher {
    ipxe_root: PathBuf,
    tftp_root: PathBuf,
    zbin: PathBuf,
}

impl IpxePatcher {
    pub fn new(ipxe_root: impl Into<PathBuf>, tftp_root: impl Into<PathBuf>) -> Self {
        Self {
            ipxe_root: ipxe_root.into(),
            tftp_root: tftp_root.into(),
            zbin: PathBuf::from(DEFAULT_ZBIN),
        }
    }

    #[must_use]
    pub fn with_zbin(mut self, zbin: impl Into<PathBuf>) -> Self {
        self.zbin = zbin.into();
        self
    }

    /// Patches the EFI binaries and the BIOS `undionly.kpxe`.
    ///
    /// `undionly.kpxe` is compressed, so its uncompressed form is patched and
    /// then recompressed with `zbin`.
    pub async fn patch_all(&self, script: &[u8]) -> Result<(), PatchError> {
        patch_file(
            &self.ipxe_root.join("amd64/snp.efi"),
            &self.tftp_root.join("snp.efi"),
            script,
        )
        .await?;
        patch_file(
            &self.ipxe_root.join("arm64/snp.efi"),
            &self.tftp_root.join("snp-arm64.efi"),
            script,
        )
        .await?;

        let kpxe = self.ipxe_root.join("amd64/kpxe");
        let patched = kpxe.join("undionly.kpxe.bin.patched");
        let zinfo = kpxe.join("undionly.kpxe.zinfo");
        patch_file(&kpxe.join("undionly.kpxe.bin"), &patched, script).await?;

        for name in ["undionly.kpxe", "undionly.kpxe.0"] {
            self.compress(&patched, &zinfo, &self.tftp_root.join(name)).await?;
        }

        info!(tftp_root = %self.tftp_root.display(), "patched iPXE binaries");
        Ok(())
    }

    /// Runs `zbin <bin> <zinfo>`, writing its stdout to `out`.
    async fn compress(&self, bin: &Path, zinfo: &Path, out: &Path) -> Result<(), PatchError> {
        let output = Command::new(&self.zbin)
            .arg(bin)
            .arg(zinfo)
            .stdin(Stdio::null())
            .stderr(Stdio::piped())
            .stdout(Stdio::piped())
            .output()
            .await
            .map_err(io_err(&self.zbin))?;

        if !output.status.success() {
            return Err(PatchError::Compress {
                path: bin.to_path_buf(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        tokio::fs::write(out, output.stdout).await.map_err(io_err(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binary_with_placeholder(padding: usize) -> Vec<u8> {
        let mut bin = b"\x7fELF-head".to_vec();
        bin.extend_from_slice(PLACEHOLDER_START);
        bin.extend(std::iter::repeat_n(b' ', padding));
        bin.extend_from_slice(PLACEHOLDER_END);
        bin.extend_from_slice(b"tail");
        bin
    }

    #[test]
    fn test_embedded_script_chains_to_endpoint() {
        let script = render_embedded_script("10.5.0.1", 8081);
        assert!(script.starts_with("#!ipxe\n"));
        assert!(script.contains(
            "chain --replace http://10.5.0.1:8081/ipxe?uuid=${uuid}&mac=${net${idx}/mac:hexhyp}&domain=${domain}&hostname=${hostname}&serial=${serial}&arch=${buildarch} || goto next_iface"
        ));
        assert!(script.contains("set attempts:int32 10"));
        assert!(script.contains("iflinkwait --timeout 5000 net${idx}"));
        assert!(script.trim_end().ends_with("reboot"));
    }

    #[test]
    fn test_environment_script() {
        let script = render_environment_script("default", &["console=tty0".to_string(), "ip=dhcp".to_string()]);
        assert_eq!(
            script,
            "#!ipxe\nkernel /env/default/vmlinuz console=tty0 ip=dhcp\ninitrd /env/default/initramfs.xz\nboot\n"
        );
    }

    #[test]
    fn test_patch_pads_region_and_keeps_size() {
        let mut bin = binary_with_placeholder(64);
        let original_len = bin.len();

        patch_script(&mut bin, b"#!ipxe\nexit\n", Path::new("test.efi")).unwrap();

        assert_eq!(bin.len(), original_len);
        assert!(bin.starts_with(b"\x7fELF-head#!ipxe\nexit\n\n\n"));
        assert!(bin.ends_with(b"\ntail"));
        assert!(find(&bin, PLACEHOLDER_START).is_none());
    }

    #[test]
    fn test_patch_rejects_oversized_script() {
        let mut bin = binary_with_placeholder(0);
        let placeholder = PLACEHOLDER_START.len() + PLACEHOLDER_END.len();
        let script = vec![b'#'; placeholder + 1];

        let err = patch_script(&mut bin, &script, Path::new("test.efi")).unwrap_err();
        assert!(matches!(err, PatchError::ScriptTooLarge { script: s, placeholder: p } if s == placeholder + 1 && p == placeholder));
    }

    #[test]
    fn test_patch_requires_markers() {
        let mut bin = b"no markers here".to_vec();
        assert!(matches!(
            patch_script(&mut bin, b"x", Path::new("a")),
            Err(PatchError::MissingStart(_))
        ));

        let mut bin = [PLACEHOLDER_END, PLACEHOLDER_START].concat();
        assert!(matches!(
            patch_script(&mut bin, b"x", Path::new("a")),
            Err(PatchError::MarkersOutOfOrder(_))
        ));
    }

    #[tokio::test]
    async fn test_patch_file_creates_destination() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("ipxe/amd64/snp.efi");
        tokio::fs::create_dir_all(source.parent().unwrap()).await.unwrap();
        tokio::fs::write(&source, binary_with_placeholder(32)).await.unwrap();

        let destination = dir.path().join("tftp/snp.efi");
        patch_file(&source, &destination, b"#!ipxe\n").await.unwrap();

        let patched = tokio::fs::read(&destination).await.unwrap();
        assert!(find(&patched, b"#!ipxe\n").is_some());
        // source untouched
        let original = tokio::fs::read(&source).await.unwrap();
        assert!(find(&original, PLACEHOLDER_START).is_some());
    }

    #[tokio::test]
    async fn test_missing_source_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let patcher = IpxePatcher::new(dir.path().join("ipxe"), dir.path().join("tftp"));
        assert!(matches!(patcher.patch_all(b"#!ipxe\n").await, Err(PatchError::Io { .. })));
    }
}
