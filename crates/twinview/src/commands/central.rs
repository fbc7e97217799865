//! `central-twin`: the management plane's view of a device.

use twinview_core::TokenSupplier;

use crate::cli::GlobalOpts;
use crate::config::Context;
use crate::error::CliError;
use crate::output;

pub async fn handle(ctx: &Context, global: &GlobalOpts) -> Result<(), CliError> {
    let device_id = ctx.device_id(global)?;
    let central = ctx.central(global)?;
    let bearer = ctx.token_supplier(global).bearer_token().await?;

    let properties = central.device_properties(&device_id, &bearer).await?;
    output::emit(global.output, &properties, global.quiet)
}
