//! Files synthesized into the project before its tooling runs.

use serde_json::{Value, json};

/// Dev-server config used when the project ships none. Serves on 5173 on all
/// interfaces, sets the isolation and CORS headers every response needs,
/// redirects `/_next/image` to the underlying asset, streams external images
/// through `/api/proxy-image` and injects a helper into `index.html` that
/// routes cross-origin `<img>` sources through that proxy.
pub const VITE_CONFIG: &str = r#"import { defineConfig } from 'vite'
import react from '@vitejs/plugin-react'

export default defineConfig({
  plugins: [
    react(),
    {
      name: 'isolation-headers',
      configureServer(server) {
        server.middlewares.use((_req, res, next) => {
          res.setHeader('Cross-Origin-Opener-Policy', 'same-origin');
          res.setHeader('Cross-Origin-Embedder-Policy', 'require-corp');
          res.setHeader('Cross-Origin-Resource-Policy', 'cross-origin');
          res.setHeader('Access-Control-Allow-Origin', '*');
          res.setHeader('Access-Control-Allow-Methods', 'GET, POST, PUT, DELETE, OPTIONS');
          res.setHeader('Access-Control-Allow-Headers', 'Content-Type, Authorization');
          next();
        });
      }
    },
    {
      name: 'image-fallback',
      configureServer(server) {
        server.middlewares.use('/_next/image', (req, res) => {
          const url = new URL(req.url || '', 'http://localhost');
          const target = url.searchParams.get('url');
          if (!target) {
            res.statusCode = 400;
            res.end('Missing url parameter');
            return;
          }
          res.statusCode = 302;
          res.setHeader('Location', decodeURIComponent(target));
          res.setHeader('Cross-Origin-Resource-Policy', 'cross-origin');
          res.end();
        });
        server.middlewares.use('/api/proxy-image', async (req, res) => {
          const fail = (status, error) => {
            res.statusCode = status;
            res.setHeader('Content-Type', 'application/json');
            res.end(JSON.stringify({ error }));
          };
          const param = new URL(req.url || '', 'http://localhost').searchParams.get('url');
          if (!param) return fail(400, 'Missing url parameter');
          let target;
          try {
            target = new URL(param);
          } catch {
            return fail(400, 'Invalid URL format');
          }
          if (target.protocol !== 'http:' && target.protocol !== 'https:') {
            return fail(400, 'Only HTTP/HTTPS URLs are allowed');
          }
          try {
            const upstream = await fetch(target.href, {
              headers: { 'User-Agent': 'devstage-image-proxy/1.0' }
            });
            if (!upstream.ok) {
              return fail(upstream.status, 'Failed to fetch image: ' + upstream.status);
            }
            res.setHeader('Content-Type', upstream.headers.get('content-type') || 'image/*');
            res.setHeader('Cross-Origin-Resource-Policy', 'cross-origin');
            res.setHeader('Access-Control-Allow-Origin', '*');
            res.setHeader('Cache-Control', 'public, max-age=3600');
            const length = upstream.headers.get('content-length');
            if (length) res.setHeader('Content-Length', length);
            if (!upstream.body) return res.end();
            const reader = upstream.body.getReader();
            for (;;) {
              const { done, value } = await reader.read();
              if (done) break;
              res.write(Buffer.from(value));
            }
            res.end();
          } catch (error) {
            if (res.headersSent) return res.end();
            fail(502, 'Image proxy error: ' + (error && error.message ? error.message : 'unknown'));
          }
        });
      }
    },
    {
      name: 'inject-image-helper',
      transformIndexHtml(html) {
        return html.replace('<head>', `<head>
    <script>
      (function () {
        function proxied(src) {
          if (!src || src.startsWith('data:') || src.startsWith('blob:')) return src;
          if (src.includes('/api/proxy-image')) return src;
          try {
            const url = new URL(src, window.location.href);
            if (url.origin === window.location.origin) return src;
            return '/api/proxy-image?url=' + encodeURIComponent(url.href);
          } catch {
            return src;
          }
        }
        function rewrite(root) {
          root.querySelectorAll('img:not([data-proxied])').forEach(function (img) {
            img.setAttribute('data-proxied', 'true');
            const src = img.getAttribute('src');
            const next = proxied(src);
            if (next !== src) img.setAttribute('src', next);
          });
        }
        window.proxyImageUrl = proxied;
        document.addEventListener('DOMContentLoaded', function () {
          rewrite(document);
          new MutationObserver(function () { rewrite(document); })
            .observe(document.body, { childList: true, subtree: true });
        });
      })();
    </script>`);
      }
    }
  ],
  server: {
    host: '0.0.0.0',
    port: 5173,
    strictPort: false,
    cors: { origin: '*', credentials: false },
    headers: {
      'Cross-Origin-Opener-Policy': 'same-origin',
      'Cross-Origin-Embedder-Policy': 'require-corp',
      'Cross-Origin-Resource-Policy': 'cross-origin'
    }
  },
  build: {
    rollupOptions: {
      output: {
        assetFileNames: 'assets/[name]-[hash][extname]'
      }
    }
  },
  define: {
    'process.env.NODE_ENV': JSON.stringify('development')
  }
})
"#;

pub const NEXT_CONFIG: &str = r#"/** @type {import('next').NextConfig} */
const nextConfig = {
  logging: {
    fetches: {
      fullUrl: true,
    },
  },
  swcMinify: false,
  compiler: {
    removeConsole: false,
    styledComponents: false,
  },
  experimental: {
    esmExternals: false,
    serverComponentsExternalPackages: [],
    turbo: false,
  },
  webpack: (config, { dev, isServer }) => {
    if (dev && !isServer) {
      config.optimization.splitChunks = false;
      config.resolve.fallback = {
        ...config.resolve.fallback,
        fs: false,
        net: false,
        tls: false,
        crypto: false,
        stream: false,
        url: false,
        zlib: false,
        http: false,
        https: false,
        assert: false,
        os: false,
        path: false,
      };
    }
    return config;
  },
  onDemandEntries: {
    maxInactiveAge: 60 * 1000,
    pagesBufferLength: 2,
  },
  images: {
    unoptimized: true,
    remotePatterns: [
      { protocol: 'https', hostname: '**' },
      { protocol: 'http', hostname: '**' },
    ],
    dangerouslyAllowSVG: true,
    contentSecurityPolicy: "default-src 'self'; script-src 'none'; sandbox;",
    minimumCacheTTL: 0,
  },
};

module.exports = nextConfig;
"#;

pub const NEXT_MIDDLEWARE: &str = r#"import { NextResponse } from 'next/server'
import type { NextRequest } from 'next/server'

export function middleware(request: NextRequest) {
  return NextResponse.next()
}

export const config = {
  matcher: [
    '/((?!_next/static|_next/image|favicon.ico).*)',
  ],
}
"#;

pub fn stackblitzrc(start_command: &str) -> Value {
    json!({
        "corsProxy": true,
        "installDependencies": true,
        "startCommand": start_command,
    })
}

/// Compiler settings with minification and mangling off.
pub fn swcrc() -> Value {
    json!({
        "jsc": {
            "parser": {
                "syntax": "typescript",
                "tsx": true,
                "decorators": false,
                "dynamicImport": true
            },
            "target": "es2020",
            "loose": false,
            "externalHelpers": false,
            "keepClassNames": true,
            "preserveAllComments": true,
            "minify": { "compress": false, "mangle": false }
        },
        "module": {
            "type": "es6",
            "strict": false,
            "strictMode": true,
            "lazy": false,
            "noInterop": false
        },
        "minify": false,
        "sourceMaps": true
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vite_template_binds_5173_with_isolation_headers() {
        assert!(VITE_CONFIG.contains("port: 5173"));
        assert!(VITE_CONFIG.contains("host: '0.0.0.0'"));
        assert!(VITE_CONFIG.contains("'Cross-Origin-Embedder-Policy', 'require-corp'"));
        assert!(VITE_CONFIG.contains("/_next/image"));
        assert!(VITE_CONFIG.contains("/api/proxy-image"));
    }

    #[test]
    fn test_vite_image_proxy_fetches_and_streams_upstream() {
        let handler = VITE_CONFIG
            .split("server.middlewares.use('/api/proxy-image'")
            .nth(1)
            .unwrap();
        assert!(handler.contains("await fetch(target.href"));
        assert!(handler.contains("res.write(Buffer.from(value))"));
        assert!(handler.contains("'Cross-Origin-Resource-Policy', 'cross-origin'"));
        assert!(handler.contains("'Only HTTP/HTTPS URLs are allowed'"));
        assert!(!handler.contains("next()"));
    }

    #[test]
    fn test_vite_index_html_routes_external_images_through_proxy() {
        assert!(VITE_CONFIG.contains("transformIndexHtml(html)"));
        assert!(VITE_CONFIG.contains("'/api/proxy-image?url=' + encodeURIComponent(url.href)"));
    }

    #[test]
    fn test_swcrc_disables_minification() {
        let config = swcrc();
        assert_eq!(config["minify"], false);
        assert_eq!(config["jsc"]["minify"]["mangle"], false);
    }

    #[test]
    fn test_stackblitzrc_carries_start_command() {
        let rc = stackblitzrc("npm run dev");
        assert_eq!(rc["startCommand"], "npm run dev");
        assert_eq!(rc["corsProxy"], true);
    }
}
