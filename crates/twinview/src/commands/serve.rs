//! `serve`: run the twin proxy until Ctrl-C.

use twinview_api::HubServiceClient;

use crate::cli::{GlobalOpts, ServeArgs};
use crate::config::Context;
use crate::error::CliError;
use crate::proxy::{self, ProxyState};

pub async fn handle(ctx: &Context, args: &ServeArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let hub = HubServiceClient::new(&ctx.transport(global))?;
    if !global.quiet {
        eprintln!("Twin proxy listening on http://{}", args.listen);
    }
    proxy::serve(args.listen, ProxyState::new(hub)).await
}
