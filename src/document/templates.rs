//! Built-in device templates
//!
//! Renders LAVA v2 job definitions for the supported devices. QEMU devices
//! deploy a kernel and root filesystem to tmpfs and boot them under QEMU;
//! the IoT2000 flashes a single disk image plus a patch archive.
//!
//! Multi-node jobs declare one role per distinct test role and run each
//! test only on the roles it names. A test without roles runs on all of
//! them.

use super::builder::{RenderError, TemplateContext, TemplateRenderer};
use super::tree::{JobDocument, Node};
use crate::job::{TestDefinition, TestSpec, IOT_DEVICE};

/// Paths of the well-known fields in built-in documents
pub mod paths {
    pub const DEVICE_TYPE: &str = "device_type";
    pub const JOB_NAME: &str = "job_name";
    pub const DEVICE: &str = "metadata.device";
    pub const JOB_TIMEOUT_MINUTES: &str = "timeouts.job.minutes";
    pub const KERNEL_URL: &str = "actions.0.deploy.images.kernel.url";
    pub const ROOTFS_URL: &str = "actions.0.deploy.images.rootfs.url";
    pub const ROOTFS_COMPRESSION: &str = "actions.0.deploy.images.rootfs.compression";
    pub const IMAGE_URL: &str = "actions.0.deploy.images.image.url";
    pub const PATCH_URL: &str = "actions.0.deploy.images.patch.url";
    pub const MULTINODE_ROLES: &str = "protocols.lava-multinode.roles";
}

/// Templates compiled into the binary
#[derive(Debug, Clone)]
pub struct BuiltinTemplates {
    pub job_timeout_minutes: u32,
    pub action_timeout_minutes: u32,
}

impl Default for BuiltinTemplates {
    fn default() -> Self {
        Self {
            job_timeout_minutes: 60,
            action_timeout_minutes: 10,
        }
    }
}

impl TemplateRenderer for BuiltinTemplates {
    fn render(&self, device: &str, context: &TemplateContext) -> Result<String, RenderError> {
        let root = match device {
            "qemux86" => self.qemu(context, "i386"),
            "qemux86-64" => self.qemu(context, "x86_64"),
            IOT_DEVICE => self.iot2000(context),
            other => return Err(RenderError::NoTemplate(other.to_string())),
        }?;
        JobDocument::new(root)
            .serialize()
            .map_err(|e| RenderError::Failed(e.to_string()))
    }
}

impl BuiltinTemplates {
    fn qemu(&self, context: &TemplateContext, arch: &str) -> Result<Node, RenderError> {
        let kernel = required(&context.kernel_url, "kernel_url")?;
        let rootfs_url = required(&context.rootfs_url, "rootfs_url")?;

        let mut rootfs = Node::mapping()
            .with("image_arg", "-drive format=raw,file={rootfs}")
            .with("url", rootfs_url);
        if context.compression {
            rootfs = rootfs.with("compression", "gz");
        }

        let deploy = Node::mapping()
            .with("timeout", minutes(5))
            .with("to", "tmpfs")
            .with(
                "images",
                Node::mapping()
                    .with(
                        "kernel",
                        Node::mapping()
                            .with("image_arg", "-kernel {kernel} -append \"root=/dev/sda rw console=ttyS0\"")
                            .with("url", kernel),
                    )
                    .with("rootfs", rootfs),
            )
            .with("os", "oe");

        let boot = Node::mapping()
            .with("timeout", minutes(5))
            .with("method", "qemu")
            .with("media", "tmpfs")
            .with("prompts", vec![format!("root@{}:~#", context.device)])
            .with(
                "auto_login",
                Node::mapping().with("login_prompt", "login:").with("username", "root"),
            );

        let header = self
            .header(context, "qemu")
            .with("context", Node::mapping().with("arch", arch));
        Ok(self.assemble(context, header, deploy, boot))
    }

    fn iot2000(&self, context: &TemplateContext) -> Result<Node, RenderError> {
        let image_url = required(&context.image_url, "image_url")?;

        let mut image = Node::mapping().with("url", image_url);
        if context.compression {
            image = image.with("compression", "gz");
        }
        let mut images = Node::mapping().with("image", image);
        if let Some(patch) = &context.patch_url {
            images = images.with("patch", Node::mapping().with("url", patch.as_str()));
        }

        let deploy = Node::mapping()
            .with("timeout", minutes(15))
            .with("to", "flasher")
            .with("images", images);

        let boot = Node::mapping()
            .with("timeout", minutes(5))
            .with("method", "minimal")
            .with("prompts", vec!["root@iot2000:~#"])
            .with(
                "auto_login",
                Node::mapping().with("login_prompt", "login:").with("username", "root"),
            );

        let header = self.header(context, IOT_DEVICE);
        Ok(self.assemble(context, header, deploy, boot))
    }

    fn header(&self, context: &TemplateContext, device_type: &str) -> Node {
        Node::mapping()
            .with("device_type", device_type)
            .with("job_name", format!("lava-ctl {}", context.device))
            .with(
                "timeouts",
                Node::mapping()
                    .with("job", minutes(self.job_timeout_minutes))
                    .with("action", minutes(self.action_timeout_minutes))
                    .with("connection", minutes(2)),
            )
            .with("priority", "medium")
            .with("visibility", "public")
            .with("metadata", Node::mapping().with("device", context.device.as_str()))
    }

    /// Attach protocols and the deploy/boot/test actions
    fn assemble(&self, context: &TemplateContext, mut header: Node, deploy: Node, boot: Node) -> Node {
        let (deploy, boot) = if context.multinode {
            let all = all_roles(context);
            header = header.with("protocols", self.multinode_protocol(context));
            (deploy.with("role", all.clone()), boot.with("role", all))
        } else {
            (deploy, boot)
        };

        let mut actions = vec![
            Node::mapping().with("deploy", deploy),
            Node::mapping().with("boot", boot),
        ];

        if context.multinode {
            for role in &context.roles {
                let tests: Vec<&TestSpec> = context
                    .tests
                    .iter()
                    .filter(|t| t.roles.is_empty() || t.roles.contains(role))
                    .collect();
                if !tests.is_empty() {
                    let action = self.test_action(&tests).with("role", vec![role.as_str()]);
                    actions.push(Node::mapping().with("test", action));
                }
            }
        } else if context.has_tests() {
            let tests: Vec<&TestSpec> = context.tests.iter().collect();
            actions.push(Node::mapping().with("test", self.test_action(&tests)));
        }

        header.with("actions", actions)
    }

    fn multinode_protocol(&self, context: &TemplateContext) -> Node {
        let device_type = if context.device == IOT_DEVICE { IOT_DEVICE } else { "qemu" };
        let roles = context.roles.iter().fold(Node::mapping(), |roles, role| {
            roles.with(
                role.as_str(),
                Node::mapping().with("device_type", device_type).with("count", 1i64),
            )
        });
        Node::mapping().with(
            "lava-multinode",
            Node::mapping()
                .with("roles", roles)
                .with("timeout", minutes(self.action_timeout_minutes)),
        )
    }

    fn test_action(&self, tests: &[&TestSpec]) -> Node {
        let definitions: Vec<Node> = tests.iter().map(|t| test_definition(t)).collect();
        Node::mapping()
            .with("timeout", minutes(self.action_timeout_minutes))
            .with("definitions", definitions)
    }
}

fn test_definition(test: &TestSpec) -> Node {
    let mut node = match &test.definition {
        TestDefinition::Remote {
            repository,
            name,
            revision,
        } => {
            let mut node = Node::mapping()
                .with("repository", repository.as_str())
                .with("from", "git")
                .with("path", name.as_str())
                .with("name", definition_name(name));
            if let Some(revision) = revision {
                node = node.with("revision", revision.as_str());
            }
            node
        }
        TestDefinition::Inline { name, steps } => {
            let steps: Vec<&str> = steps.iter().map(String::as_str).collect();
            let repository = Node::mapping()
                .with(
                    "metadata",
                    Node::mapping()
                        .with("format", "Lava-Test Test Definition 1.0")
                        .with("name", definition_name(name))
                        .with("description", format!("inline test {}", name)),
                )
                .with("run", Node::mapping().with("steps", steps));
            Node::mapping()
                .with("repository", repository)
                .with("from", "inline")
                .with("path", format!("inline/{}.yaml", definition_name(name)))
                .with("name", definition_name(name))
        }
    };

    if !test.params.is_empty() {
        let params = test
            .params
            .iter()
            .fold(Node::mapping(), |params, (k, v)| params.with(k.as_str(), v.as_str()));
        node = node.with("parameters", params);
    }
    node
}

/// Test name the scheduler accepts: file stem with unsafe characters replaced
fn definition_name(name: &str) -> String {
    let stem = name.rsplit('/').next().unwrap_or(name);
    let stem = stem
        .strip_suffix(".yaml")
        .or_else(|| stem.strip_suffix(".yml"))
        .unwrap_or(stem);
    stem.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '-' })
        .collect()
}

fn all_roles(context: &TemplateContext) -> Vec<&str> {
    context.roles.iter().map(String::as_str).collect()
}

fn minutes(n: u32) -> Node {
    Node::mapping().with("minutes", n)
}

fn required<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str, RenderError> {
    value
        .as_deref()
        .ok_or_else(|| RenderError::Failed(format!("{} is required", name)))
}
