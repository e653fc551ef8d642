//! Service build options

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Service;

use crate::controller::options::{
    apply_custom_annotations, apply_custom_annotations_template, BuildOption,
};
use crate::crd::GameServer;
use crate::error::Result;
use crate::gameserver::OCTOPS_ANNOTATION_CUSTOM_SERVICE_PREFIX;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServiceOption {
    CustomAnnotations,
    CustomAnnotationsTemplate,
}

pub fn service_pipeline() -> Vec<ServiceOption> {
    vec![
        ServiceOption::CustomAnnotations,
        ServiceOption::CustomAnnotationsTemplate,
    ]
}

impl BuildOption<Service> for ServiceOption {
    fn apply(&self, gs: &GameServer, service: &mut Service) -> Result<()> {
        let annotations = service.metadata.annotations.get_or_insert_with(BTreeMap::new);
        match self {
            ServiceOption::CustomAnnotations => {
                apply_custom_annotations(gs, OCTOPS_ANNOTATION_CUSTOM_SERVICE_PREFIX, annotations)
            }
            ServiceOption::CustomAnnotationsTemplate => apply_custom_annotations_template(
                gs,
                OCTOPS_ANNOTATION_CUSTOM_SERVICE_PREFIX,
                annotations,
            ),
        }
    }
}
