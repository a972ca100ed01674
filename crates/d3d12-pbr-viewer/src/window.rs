use d3d12_pbr_engine::display::WindowEventListener;
use eyre::WrapErr;
use widestring::U16CString;
use windows::Win32::Foundation::*;
use windows::Win32::System::LibraryLoader::GetModuleHandleW;
use windows::Win32::UI::WindowsAndMessaging::*;
use windows::core::PCWSTR;
use windows::core::w;

const CLASS_NAME: PCWSTR = w!("D3d12PbrViewerWindow");
const KEY_ESCAPE: u8 = 0x1B;

/// Registers the class and creates a hidden window whose client area is `width` by `height`.
///
/// `handler` must outlive the window; the window procedure reaches it through `GWLP_USERDATA`.
pub fn create_window<H: WindowEventListener>(
    title: &str,
    width: u32,
    height: u32,
    handler: *mut H,
) -> eyre::Result<HWND> {
    let instance = unsafe { GetModuleHandleW(None)? };
    let wc = WNDCLASSEXW {
        cbSize: std::mem::size_of::<WNDCLASSEXW>() as u32,
        style: CS_HREDRAW | CS_VREDRAW,
        lpfnWndProc: Some(wndproc::<H>),
        hInstance: instance.into(),
        hCursor: unsafe { LoadCursorW(None, IDC_ARROW)? },
        lpszClassName: CLASS_NAME,
        ..Default::default()
    };
    if unsafe { RegisterClassExW(&wc) } == 0 {
        eyre::bail!("RegisterClassExW failed");
    }

    let mut window_rect = RECT {
        left: 0,
        top: 0,
        right: width as i32,
        bottom: height as i32,
    };
    unsafe { AdjustWindowRect(&mut window_rect, WS_OVERLAPPEDWINDOW, false)? };

    let title = U16CString::from_str(title).wrap_err("window title")?;
    let hwnd = unsafe {
        CreateWindowExW(
            WINDOW_EX_STYLE::default(),
            CLASS_NAME,
            PCWSTR(title.as_ptr()),
            WS_OVERLAPPEDWINDOW,
            CW_USEDEFAULT,
            CW_USEDEFAULT,
            window_rect.right - window_rect.left,
            window_rect.bottom - window_rect.top,
            None,
            None,
            Some(instance.into()),
            Some(handler as _),
        )
    }?;
    Ok(hwnd)
}

pub fn show(hwnd: HWND) {
    unsafe { _ = ShowWindow(hwnd, SW_SHOW) };
}

/// Dispatches pending messages. Returns `false` once `WM_QUIT` has been seen.
pub fn pump_messages() -> bool {
    let mut message = MSG::default();
    while unsafe { PeekMessageW(&mut message, None, 0, 0, PM_REMOVE) }.into() {
        if message.message == WM_QUIT {
            return false;
        }
        unsafe {
            _ = TranslateMessage(&message);
            DispatchMessageW(&message);
        }
    }
    true
}

pub fn close(hwnd: HWND) {
    if let Err(e) = unsafe { DestroyWindow(hwnd) } {
        tracing::warn!("DestroyWindow failed: {:?}", e);
    }
}

fn dispatch<H: WindowEventListener>(handler: &mut H, hwnd: HWND, message: u32, wparam: WPARAM) -> bool {
    match message {
        WM_MOVE => {
            handler.on_window_moved();
            true
        }
        WM_DISPLAYCHANGE => {
            handler.on_display_changed();
            true
        }
        WM_KEYUP if wparam.0 as u8 == KEY_ESCAPE => {
            close(hwnd);
            true
        }
        WM_DESTROY => {
            unsafe { PostQuitMessage(0) };
            true
        }
        _ => false,
    }
}

extern "system" fn wndproc<H: WindowEventListener>(
    window: HWND,
    message: u32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    if message == WM_CREATE {
        unsafe {
            let create_struct: &CREATESTRUCTW = &*(lparam.0 as *const CREATESTRUCTW);
            SetWindowLongPtrW(window, GWLP_USERDATA, create_struct.lpCreateParams as _);
        }
        return LRESULT(0);
    }

    // Messages can arrive before WM_CREATE.
    let user_data = unsafe { GetWindowLongPtrW(window, GWLP_USERDATA) };
    let handled = match std::ptr::NonNull::<H>::new(user_data as *mut H) {
        Some(mut handler) => dispatch(unsafe { handler.as_mut() }, window, message, wparam),
        None => false,
    };

    if handled {
        LRESULT(0)
    } else {
        unsafe { DefWindowProcW(window, message, wparam, lparam) }
    }
}
