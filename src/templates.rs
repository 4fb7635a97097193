//! Renders the `versions.tf` backend/provider block (spec §4.6 / SPEC_FULL §7).
//!
//! Grounded on `original_source/pkg/utils/providers.go::GenerateTerraformConfig`.
//! The Go template data struct carries both `Context` and `Workspace` fields
//! but the only call site (`AddProviders`) never populates them — only
//! `UserID`/`Project`. This port resolves that dangling mismatch by keying
//! the backend state path on `<user_id>/<project>/terraform.tfstate`, the one
//! combination the source code actually produces.

use serde::Serialize;
use tera::{Context, Tera};

const TEMPLATE_NAME: &str = "versions.tf";
const TEMPLATE_SOURCE: &str = r#"
terraform {
    backend "s3" {
        bucket  = "{{ bucket }}"
        key     = "{{ user_id }}/{{ project }}/terraform.tfstate"
        region  = "eu-west-3"
        profile = "tfstate"
    }
    required_providers {
{%- for provider in providers %}
        {{ provider.name }} = {
            source = "{{ provider.source }}"
            version = "{{ provider.version }}"
        }
{%- endfor %}
    }
}
"#;

#[derive(Debug, Clone, Serialize)]
pub struct ProviderSpec {
    pub name: String,
    pub source: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TerraformTemplateData {
    pub bucket: String,
    pub user_id: String,
    pub project: String,
    pub providers: Vec<ProviderSpec>,
}

pub fn render_versions_tf(data: &TerraformTemplateData) -> anyhow::Result<String> {
    let mut tera = Tera::default();
    tera.add_raw_template(TEMPLATE_NAME, TEMPLATE_SOURCE)?;
    let context = Context::from_serialize(data)?;
    Ok(tera.render(TEMPLATE_NAME, &context)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_backend_and_providers() {
        let data = TerraformTemplateData {
            bucket: "uptimeai-test-bucket".to_string(),
            user_id: "acme".to_string(),
            project: "infra".to_string(),
            providers: vec![ProviderSpec { name: "aws".to_string(), source: "hashicorp/aws".to_string(), version: "~> 5.0".to_string() }],
        };

        let rendered = render_versions_tf(&data).unwrap();
        assert!(rendered.contains(r#"bucket  = "uptimeai-test-bucket""#));
        assert!(rendered.contains(r#"key     = "acme/infra/terraform.tfstate""#));
        assert!(rendered.contains(r#"aws = {"#));
        assert!(rendered.contains(r#"source = "hashicorp/aws""#));
    }

    #[test]
    fn renders_with_no_providers() {
        let data = TerraformTemplateData { bucket: "b".to_string(), user_id: "u".to_string(), project: "p".to_string(), providers: vec![] };
        let rendered = render_versions_tf(&data).unwrap();
        assert!(rendered.contains("required_providers {"));
    }
}
