/*!
The mini embedded HTTP/1.1 web server: virtual directories, aliasing of the device description
document, and the byte-range-aware file router.
*/

// ------------------------------------------------------------------------------------------------
// Modules
// ------------------------------------------------------------------------------------------------

mod alias;
pub use alias::WebAlias;

mod virtual_dir;
pub use virtual_dir::{DirCallbacks, VirtualDir, VirtualDirTable};

mod router;
pub use router::{handle_request, RouterError};

mod server;
pub use server::{
    ControlRequest, ControlResponse, HostValidator, HttpServer, NotifyHandler, RequestHandler, ServiceEndpoint,
};
