//! `cloud-twin`: search every hub tenant behind the application for the
//! device's twin.

use twinview_api::{HubServiceClient, TwinProxyClient};
use twinview_core::{DiscoveredTwin, HubDiscovery, TwinLookup, fetch_tenant_tokens};

use crate::cli::{CloudTwinArgs, GlobalOpts};
use crate::config::Context;
use crate::error::CliError;
use crate::output;

pub async fn handle(ctx: &Context, args: CloudTwinArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let device_id = ctx.device_id(global)?;
    let central = ctx.central(global)?;
    let transport = ctx.transport(global);

    let tenants = fetch_tenant_tokens(&central, &ctx.token_supplier(global)).await?;

    let lookup: Box<dyn TwinLookup> = match ctx.proxy_url(args.proxy_url.as_deref())? {
        Some(url) => {
            tracing::debug!(%url, "Looking up twins through proxy");
            Box::new(TwinProxyClient::new(url, &transport)?)
        }
        None => Box::new(HubServiceClient::new(&transport)?),
    };

    let found: DiscoveredTwin = HubDiscovery::new(lookup).find_twin(&device_id, &tenants).await?;
    output::emit(global.output, &found, global.quiet)
}
