//! `provision`: one DPS registration, printed as its outcome.

use twinview_core::ProvisioningResult;

use crate::cli::{GlobalOpts, ProvisionArgs};
use crate::config::Context;
use crate::error::CliError;
use crate::output;

pub async fn handle(ctx: &Context, args: &ProvisionArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let device_id = ctx.device_id(global)?;
    let resolver = ctx.resolver(global)?;
    let provisioning = ctx.provisioning(global, args)?;

    let identity = resolver
        .resolve(
            &device_id,
            &ctx.supplied_credentials(global),
            &ctx.token_supplier(global),
        )
        .await?;

    let result = provisioning.register(&identity).await?;
    output::emit(global.output, &result, global.quiet)?;

    // A printed failure still fails the process
    match result {
        ProvisioningResult::Assigned { .. } => Ok(()),
        ProvisioningResult::Assigning => Err(CliError::NotAssigned {
            reason: "registration still in progress".into(),
        }),
        failed @ ProvisioningResult::Failed { .. } => Err(CliError::NotAssigned {
            reason: failed.failure().unwrap_or_default(),
        }),
    }
}
